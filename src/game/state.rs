//! Match State Definitions
//!
//! State for one active two-player maze race. Uses BTreeMap for
//! deterministic iteration order.

use std::collections::BTreeMap;

use crate::game::maze::{Maze, Tile};

// =============================================================================
// PAIR KEY
// =============================================================================

/// The unordered pair of player names a match is keyed by.
///
/// Names are stored lexicographically sorted so that `(a, b)` and `(b, a)`
/// produce the same key, which is what enforces "at most one match per
/// pair" at the type level.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairKey(String, String);

impl PairKey {
    /// Build the key for two names, in either order.
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self(a.to_string(), b.to_string())
        } else {
            Self(b.to_string(), a.to_string())
        }
    }

    /// Whether the pair mentions the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.0 == name || self.1 == name
    }

    /// The pair member that is not `name`, if `name` is a member.
    pub fn other(&self, name: &str) -> Option<&str> {
        if self.0 == name {
            Some(&self.1)
        } else if self.1 == name {
            Some(&self.0)
        } else {
            None
        }
    }

    /// Both names, lexicographically ordered.
    pub fn names(&self) -> [&str; 2] {
        [&self.0, &self.1]
    }
}

// =============================================================================
// MATCH STATE
// =============================================================================

/// One active maze race between exactly two players.
///
/// Holds the immutable maze, each player's last reported tile, and the
/// winner once someone reaches the goal. Created by challenge acceptance,
/// destroyed when a participant leaves or disconnects.
#[derive(Clone, Debug)]
pub struct MatchState {
    /// Unique match identifier, also the maze seed input.
    pub id: [u8; 16],
    /// The maze both players race on.
    pub maze: Maze,
    /// Last reported tile per player name.
    positions: BTreeMap<String, Tile>,
    /// Set exactly once, by the first player to reach the goal.
    winner: Option<String>,
}

impl MatchState {
    /// Create a match, placing each player on one of the maze's start tiles.
    pub fn new(id: [u8; 16], maze: Maze, first: &str, second: &str) -> Self {
        let [start_a, start_b] = maze.starts();
        let mut positions = BTreeMap::new();
        positions.insert(first.to_string(), start_a);
        positions.insert(second.to_string(), start_b);

        Self {
            id,
            maze,
            positions,
            winner: None,
        }
    }

    /// Record a player's reported tile.
    ///
    /// Tile validity (bounds, walls, adjacency) is not re-checked here;
    /// the client owns movement legality and the server only records the
    /// report and evaluates the win condition. Returns `true` when this
    /// report is the first to reach the goal, which decides the race.
    pub fn record_move(&mut self, player: &str, tile: Tile) -> bool {
        self.positions.insert(player.to_string(), tile);

        if self.winner.is_none() && tile == self.maze.goal() {
            self.winner = Some(player.to_string());
            return true;
        }
        false
    }

    /// A player's last reported tile.
    pub fn position_of(&self, player: &str) -> Option<Tile> {
        self.positions.get(player).copied()
    }

    /// The other participant's name, if `player` is a participant.
    pub fn opponent_of(&self, player: &str) -> Option<&str> {
        if !self.positions.contains_key(player) {
            return None;
        }
        self.positions
            .keys()
            .map(String::as_str)
            .find(|name| *name != player)
    }

    /// The winner, once decided.
    pub fn winner(&self) -> Option<&str> {
        self.winner.as_deref()
    }

    /// Start-tile assignment for the wire handout, name -> tile.
    pub fn start_positions(&self) -> &BTreeMap<String, Tile> {
        &self.positions
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::DeterministicRng;
    use crate::game::generator;

    fn test_match() -> MatchState {
        let mut rng = DeterministicRng::new(99);
        let maze = generator::generate(9, &mut rng);
        MatchState::new([7; 16], maze, "alice", "bob")
    }

    #[test]
    fn test_pair_key_unordered() {
        assert_eq!(PairKey::new("alice", "bob"), PairKey::new("bob", "alice"));
        assert_ne!(PairKey::new("alice", "bob"), PairKey::new("alice", "carol"));
    }

    #[test]
    fn test_pair_key_contains_and_other() {
        let key = PairKey::new("bob", "alice");
        assert!(key.contains("alice"));
        assert!(key.contains("bob"));
        assert!(!key.contains("carol"));

        assert_eq!(key.other("alice"), Some("bob"));
        assert_eq!(key.other("bob"), Some("alice"));
        assert_eq!(key.other("carol"), None);
    }

    #[test]
    fn test_new_match_places_players_on_starts() {
        let m = test_match();
        let starts = m.maze.starts();

        let alice = m.position_of("alice").unwrap();
        let bob = m.position_of("bob").unwrap();
        assert!(starts.contains(&alice));
        assert!(starts.contains(&bob));
        assert_ne!(alice, bob);
    }

    #[test]
    fn test_record_move_updates_position() {
        let mut m = test_match();
        let tile = crate::game::maze::Tile::new(1, 1);

        let won = m.record_move("alice", tile);
        assert!(!won || m.maze.goal() == tile);
        assert_eq!(m.position_of("alice"), Some(tile));
    }

    #[test]
    fn test_goal_reach_wins_once() {
        let mut m = test_match();
        let goal = m.maze.goal();

        assert!(m.record_move("alice", goal));
        assert_eq!(m.winner(), Some("alice"));

        // A later goal report never steals the win
        assert!(!m.record_move("bob", goal));
        assert_eq!(m.winner(), Some("alice"));
    }

    #[test]
    fn test_opponent_of() {
        let m = test_match();
        assert_eq!(m.opponent_of("alice"), Some("bob"));
        assert_eq!(m.opponent_of("bob"), Some("alice"));
        assert_eq!(m.opponent_of("carol"), None);
    }
}
