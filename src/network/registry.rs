//! Shared Server State
//!
//! The single source of truth for everything the handlers mutate: which
//! connections exist, who is logged in, pending challenges, active
//! matches, scores, chat history, and per-connection liveness. The server
//! wraps one `Registry` in a mutex; every handler runs under that lock,
//! mutates, and returns an [`Outbox`] of messages which the caller flushes
//! only after the lock has been released, so network writes never happen
//! inside the critical section.
//!
//! All teardown paths (explicit disconnect, framing fault, delivery fault,
//! heartbeat timeout) funnel into [`Registry::teardown`], which cascades
//! match closure and challenge invalidation exactly once per connection.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::core::rng::DeterministicRng;
use crate::game::generator;
use crate::game::maze::Tile;
use crate::game::state::{MatchState, PairKey};
use crate::network::protocol::{
    ChatLine, ClientMessage, LoginSnapshot, MatchHandout, PresenceUpdate, ServerMessage,
};
use crate::MAX_NAME_LEN;

// =============================================================================
// CONNECTION IDENTITY AND OUTBOX
// =============================================================================

/// Identifier for one accepted connection, unique for the process lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// One message queued for one connection.
///
/// Carries a clone of the target's channel handle so the caller can
/// deliver after dropping the registry lock.
#[derive(Debug)]
pub struct Delivery {
    /// Target connection, for teardown if delivery fails.
    pub conn: ConnId,
    /// The target's outbound channel.
    pub sender: mpsc::Sender<ServerMessage>,
    /// The message to deliver.
    pub message: ServerMessage,
}

/// Messages produced by a handler, flushed after the lock is released.
pub type Outbox = Vec<Delivery>;

/// Per-connection bookkeeping.
struct Connection {
    /// Outbound channel drained by the connection's writer task.
    sender: mpsc::Sender<ServerMessage>,
    /// Display name, once logged in.
    name: Option<String>,
    /// Refreshed on every inbound message; read by the heartbeat sweep.
    last_seen: Instant,
    /// Fired exactly once, on teardown, to stop the reader task.
    kill: Option<oneshot::Sender<()>>,
}

// =============================================================================
// REGISTRY
// =============================================================================

/// The server's shared mutable state. See the module docs for the locking
/// discipline.
pub struct Registry {
    /// Every accepted connection, logged in or not.
    conns: BTreeMap<ConnId, Connection>,
    /// Online name -> owning connection. Kept in sync with `conns`.
    players: BTreeMap<String, ConnId>,
    /// Win count per online player. Reset only by removal.
    scores: BTreeMap<String, u32>,
    /// Pending (challenger, target) intents.
    challenges: BTreeSet<(String, String)>,
    /// Active matches keyed by the unordered participant pair.
    matches: BTreeMap<PairKey, MatchState>,
    /// Recent public chat, oldest first, capped.
    chat_history: VecDeque<ChatLine>,
    /// Cap on `chat_history`.
    chat_limit: usize,
    /// Inclusive odd maze side-length range for new matches.
    maze_sizes: (i32, i32),
}

impl Registry {
    /// Create an empty registry.
    pub fn new(maze_sizes: (i32, i32), chat_limit: usize) -> Self {
        Self {
            conns: BTreeMap::new(),
            players: BTreeMap::new(),
            scores: BTreeMap::new(),
            challenges: BTreeSet::new(),
            matches: BTreeMap::new(),
            chat_history: VecDeque::new(),
            chat_limit,
            maze_sizes,
        }
    }

    // -------------------------------------------------------------------------
    // Connection lifecycle
    // -------------------------------------------------------------------------

    /// Track a freshly accepted connection.
    pub fn register(
        &mut self,
        id: ConnId,
        sender: mpsc::Sender<ServerMessage>,
        kill: oneshot::Sender<()>,
    ) {
        self.conns.insert(
            id,
            Connection {
                sender,
                name: None,
                last_seen: Instant::now(),
                kill: Some(kill),
            },
        );
        debug!(%id, "connection registered");
    }

    /// Number of tracked connections.
    pub fn conn_count(&self) -> usize {
        self.conns.len()
    }

    /// Whether the connection is still tracked.
    pub fn is_connected(&self, id: ConnId) -> bool {
        self.conns.contains_key(&id)
    }

    /// The display name owned by a connection, if logged in.
    pub fn name_of(&self, id: ConnId) -> Option<&str> {
        self.conns.get(&id).and_then(|c| c.name.as_deref())
    }

    /// Refresh a connection's liveness stamp.
    pub fn touch(&mut self, id: ConnId) {
        if let Some(conn) = self.conns.get_mut(&id) {
            conn.last_seen = Instant::now();
        }
    }

    /// Remove a connection and cascade: the owning player (if any) leaves
    /// every match and challenge, the opponent is notified and freed, and
    /// the remaining sockets get a presence update.
    ///
    /// Idempotent - the reader path, the delivery path, and the heartbeat
    /// sweep may all race to tear down the same connection, and only the
    /// first invocation finds the entry. The kill signal is a oneshot, so
    /// the underlying socket is told to close exactly once.
    pub fn teardown(&mut self, id: ConnId) -> Outbox {
        let Some(mut conn) = self.conns.remove(&id) else {
            return Vec::new();
        };
        if let Some(kill) = conn.kill.take() {
            let _ = kill.send(());
        }

        let outbox = match conn.name.take() {
            Some(name) => {
                info!(%id, %name, "player disconnected");
                self.remove_player(&name, id)
            }
            None => Vec::new(),
        };
        debug!(%id, "connection torn down");
        outbox
    }

    /// Tear down every connection silent for longer than `timeout`.
    ///
    /// Runs on the sweep task's fixed interval; connections added or
    /// removed since the previous sweep are picked up naturally because
    /// the stale set is recomputed from the live table each time.
    pub fn sweep(&mut self, timeout: Duration) -> Outbox {
        let stale: Vec<ConnId> = self
            .conns
            .iter()
            .filter(|(_, conn)| conn.last_seen.elapsed() > timeout)
            .map(|(id, _)| *id)
            .collect();

        let mut outbox = Vec::new();
        for id in stale {
            warn!(%id, "heartbeat timeout, reclaiming connection");
            outbox.extend(self.teardown(id));
        }
        outbox
    }

    // -------------------------------------------------------------------------
    // Router
    // -------------------------------------------------------------------------

    /// Dispatch one decoded envelope to its handler.
    ///
    /// Exhaustive over [`ClientMessage`], so adding a tag without a handler
    /// fails to compile. Every inbound message refreshes the liveness
    /// stamp, not just explicit heartbeats.
    pub fn route(&mut self, id: ConnId, message: ClientMessage) -> Outbox {
        self.touch(id);

        match message {
            ClientMessage::LoginAttempt(name) => self.login(id, &name),
            ClientMessage::Disconnect(_) => self.teardown(id),
            ClientMessage::CreateChallenge(target) => self.create_challenge(id, &target),
            ClientMessage::DeleteChallenge(target) => self.withdraw_challenge(id, &target),
            ClientMessage::AcceptChallenge(challenger) => self.accept_challenge(id, &challenger),
            ClientMessage::ChangePosition(tile) => self.change_position(id, tile),
            ClientMessage::LeavingGame(opponent) => self.leave_game(id, &opponent),
            ClientMessage::PlayerHaveWonAGame => self.report_win(id),
            ClientMessage::PublicMessage(text) => self.public_message(id, text),
            ClientMessage::PrivateMessage(text) => self.private_message(id, text),
            ClientMessage::Heartbeat => self.heartbeat(id),
        }
    }

    // -------------------------------------------------------------------------
    // Presence
    // -------------------------------------------------------------------------

    /// Handle a login attempt.
    ///
    /// Rejects with `wrong_login_name` when the name is taken, empty, or
    /// too long, or when this connection already owns a name; a rejection
    /// leaves the registry untouched. On success the new socket gets the
    /// full world snapshot and every other socket gets a presence diff.
    fn login(&mut self, id: ConnId, name: &str) -> Outbox {
        if !self.is_connected(id) {
            return Vec::new();
        }

        let rejected = name.is_empty()
            || name.chars().count() > MAX_NAME_LEN
            || self.players.contains_key(name)
            || self.name_of(id).is_some();
        if rejected {
            debug!(%id, name, "login rejected");
            return self.to_one(id, ServerMessage::WrongLoginName);
        }

        if let Some(conn) = self.conns.get_mut(&id) {
            conn.name = Some(name.to_string());
        }
        self.players.insert(name.to_string(), id);
        self.scores.insert(name.to_string(), 0);
        info!(%id, name, "player logged in");

        let mut outbox = self.to_one(id, ServerMessage::LoginSuccessful(self.login_snapshot()));
        let update = ServerMessage::UserCountChange(self.presence_update());
        outbox.extend(self.broadcast_except(Some(id), update));
        outbox
    }

    /// Remove a player and cascade its matches and challenges.
    ///
    /// Idempotent - a no-op when the name is not registered.
    fn remove_player(&mut self, name: &str, departing: ConnId) -> Outbox {
        if self.players.remove(name).is_none() {
            return Vec::new();
        }
        self.scores.remove(name);

        let mut outbox = Vec::new();

        // Close every match containing the player; the opponent is
        // notified and freed to accept new challenges.
        for key in self.matches_involving(name) {
            self.matches.remove(&key);
            if let Some(opponent) = key.other(name) {
                outbox.extend(self.to_player(opponent, ServerMessage::LeftGame(name.to_string())));
            }
        }

        // Challenges mentioning the player are void in either direction.
        self.challenges
            .retain(|(from, to)| from != name && to != name);

        let update = ServerMessage::UserCountChange(self.presence_update());
        outbox.extend(self.broadcast_except(Some(departing), update));
        outbox
    }

    // -------------------------------------------------------------------------
    // Challenges
    // -------------------------------------------------------------------------

    /// Record a challenge and notify the target.
    ///
    /// The notice is dropped silently when the target is absent (it may
    /// have just disconnected); the pending entry is recorded regardless
    /// and pruned by the cascades.
    fn create_challenge(&mut self, id: ConnId, target: &str) -> Outbox {
        let Some(challenger) = self.name_of(id).map(str::to_string) else {
            return Vec::new();
        };
        if challenger == target {
            debug!(%id, "self-challenge ignored");
            return Vec::new();
        }

        self.challenges
            .insert((challenger.clone(), target.to_string()));
        self.to_player(target, ServerMessage::ReceivedChallenge(challenger))
    }

    /// Withdraw a pending challenge and notify the target.
    fn withdraw_challenge(&mut self, id: ConnId, target: &str) -> Outbox {
        let Some(challenger) = self.name_of(id).map(str::to_string) else {
            return Vec::new();
        };

        self.challenges
            .remove(&(challenger.clone(), target.to_string()));
        self.to_player(target, ServerMessage::DeleteChallenge(challenger))
    }

    /// Accept a challenge, promoting it to a match.
    ///
    /// The only precondition is that neither party currently owns a match
    /// (and both are online) - acceptance does not require the pending
    /// entry to still exist. Generates the maze, stores the match under
    /// the unordered pair, hands the maze to both participants, and voids
    /// every challenge mentioning either of them, telling the affected
    /// third parties.
    fn accept_challenge(&mut self, id: ConnId, challenger: &str) -> Outbox {
        let Some(acceptor) = self.name_of(id).map(str::to_string) else {
            return Vec::new();
        };
        if acceptor == challenger {
            return Vec::new();
        }
        if !self.players.contains_key(challenger) {
            debug!(%id, challenger, "accept dropped, challenger offline");
            return Vec::new();
        }

        // Invariant: a player belongs to at most one match. Checked here,
        // under the same lock that inserts the match, so two racing
        // accepts cannot both pass.
        let busy = |name: &str| !self.matches_involving(name).is_empty();
        if busy(&acceptor) || busy(challenger) {
            warn!(%id, challenger, %acceptor, "accept rejected, party already racing");
            return Vec::new();
        }

        let match_id = *uuid::Uuid::new_v4().as_bytes();
        let mut names = [challenger, acceptor.as_str()];
        names.sort_unstable();
        let mut rng = DeterministicRng::for_match(&match_id, &names);
        let size = rng.next_odd_range(self.maze_sizes.0, self.maze_sizes.1);
        let maze = generator::generate(size, &mut rng);

        let state = MatchState::new(match_id, maze, challenger, &acceptor);
        info!(
            match_id = %hex::encode(&match_id[..4]),
            challenger,
            %acceptor,
            size,
            "match created"
        );

        let mut outbox = Vec::new();
        outbox.extend(self.to_player(
            challenger,
            ServerMessage::AcceptedChallenge(MatchHandout::for_recipient(&state, &acceptor)),
        ));
        outbox.extend(self.to_player(
            &acceptor,
            ServerMessage::AcceptedChallenge(MatchHandout::for_recipient(&state, challenger)),
        ));

        // Void every challenge mentioning either participant and tell the
        // third parties holding one, so stale challenge UI state is pruned
        // everywhere.
        let mentioned = |name: &str| name == challenger || name == acceptor;
        let voided: Vec<(String, String)> = self
            .challenges
            .iter()
            .filter(|(from, to)| mentioned(from) || mentioned(to))
            .cloned()
            .collect();
        let mut notified = BTreeSet::new();
        for (from, to) in voided {
            self.challenges.remove(&(from.clone(), to.clone()));
            for third in [from, to] {
                if !mentioned(&third) && notified.insert(third.clone()) {
                    outbox.extend(self.to_player(
                        &third,
                        ServerMessage::ChallengeNoLongerValid([
                            challenger.to_string(),
                            acceptor.clone(),
                        ]),
                    ));
                }
            }
        }

        self.matches
            .insert(PairKey::new(challenger, &acceptor), state);
        outbox
    }

    // -------------------------------------------------------------------------
    // Matches
    // -------------------------------------------------------------------------

    /// Every match key containing the player. The invariants keep this at
    /// zero or one entry; the cascade iterates anyway.
    pub fn matches_involving(&self, name: &str) -> Vec<PairKey> {
        self.matches
            .keys()
            .filter(|key| key.contains(name))
            .cloned()
            .collect()
    }

    /// Record a position report and relay it to the opponent.
    ///
    /// Tile legality is owned by the reporting client and is not
    /// re-validated here; the server records the tile and evaluates the
    /// win condition. The first report to land on the goal wins: the
    /// winner's score goes up and every connected socket hears about it.
    fn change_position(&mut self, id: ConnId, tile: Tile) -> Outbox {
        let Some(name) = self.name_of(id).map(str::to_string) else {
            return Vec::new();
        };
        let Some(key) = self.matches_involving(&name).into_iter().next() else {
            debug!(%id, %name, "position report outside any match dropped");
            return Vec::new();
        };

        let Some(state) = self.matches.get_mut(&key) else {
            return Vec::new();
        };
        let won = state.record_move(&name, tile);
        let opponent = state.opponent_of(&name).map(str::to_string);

        let mut outbox = Vec::new();
        if won {
            if let Some(score) = self.scores.get_mut(&name) {
                *score += 1;
            }
            info!(%name, "player won a race");
            outbox.extend(
                self.broadcast_except(None, ServerMessage::PlayerHasWonAGame(name.clone())),
            );
        }
        if let Some(opponent) = opponent {
            outbox.extend(
                self.to_player(&opponent, ServerMessage::OpponentChangedPosition(tile)),
            );
        }
        outbox
    }

    /// Leave the match against `opponent`, freeing both players.
    ///
    /// Only the opponent is told; unrelated sockets are not.
    fn leave_game(&mut self, id: ConnId, opponent: &str) -> Outbox {
        let Some(name) = self.name_of(id).map(str::to_string) else {
            return Vec::new();
        };

        let key = PairKey::new(&name, opponent);
        if self.matches.remove(&key).is_none() {
            debug!(%id, %name, opponent, "leave for unknown match dropped");
            return Vec::new();
        }
        self.to_player(opponent, ServerMessage::LeftGame(name))
    }

    /// Manual win report: score the sender and tell every socket.
    ///
    /// Deliberately unconditional (beyond the sender being logged in),
    /// matching the position-report trust boundary.
    fn report_win(&mut self, id: ConnId) -> Outbox {
        let Some(name) = self.name_of(id).map(str::to_string) else {
            return Vec::new();
        };

        if let Some(score) = self.scores.get_mut(&name) {
            *score += 1;
        }
        info!(%name, "win reported");
        self.broadcast_except(None, ServerMessage::PlayerHasWonAGame(name))
    }

    // -------------------------------------------------------------------------
    // Chat
    // -------------------------------------------------------------------------

    /// Store a public chat line and relay it to everyone else, verbatim.
    fn public_message(&mut self, id: ConnId, text: String) -> Outbox {
        if self.name_of(id).is_none() {
            return Vec::new();
        }

        self.chat_history.push_back(ChatLine {
            text: text.clone(),
            at: Utc::now(),
        });
        while self.chat_history.len() > self.chat_limit {
            self.chat_history.pop_front();
        }

        self.broadcast_except(Some(id), ServerMessage::PublicMessage(text))
    }

    /// Relay a private chat line to the sender's current opponent.
    ///
    /// Dropped, not fatal, when the sender has no match or the opponent
    /// is gone.
    fn private_message(&mut self, id: ConnId, text: String) -> Outbox {
        let Some(name) = self.name_of(id) else {
            return Vec::new();
        };
        let Some(key) = self.matches_involving(name).into_iter().next() else {
            return Vec::new();
        };
        let name = name.to_string();
        match key.other(&name) {
            Some(opponent) => {
                let opponent = opponent.to_string();
                self.to_player(&opponent, ServerMessage::PrivateMessage(text))
            }
            None => Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Heartbeats
    // -------------------------------------------------------------------------

    /// Echo a heartbeat so the client can detect a dead server
    /// symmetrically. The liveness stamp was already refreshed by the
    /// router.
    fn heartbeat(&mut self, id: ConnId) -> Outbox {
        self.to_one(id, ServerMessage::Heartbeat)
    }

    // -------------------------------------------------------------------------
    // Snapshots and delivery helpers
    // -------------------------------------------------------------------------

    /// The presence diff sent on every membership change.
    fn presence_update(&self) -> PresenceUpdate {
        PresenceUpdate {
            players: self.players.keys().cloned().collect(),
            scores: self.scores.clone(),
        }
    }

    /// The full snapshot handed to a freshly logged-in client.
    fn login_snapshot(&self) -> LoginSnapshot {
        LoginSnapshot {
            players: self.players.keys().cloned().collect(),
            matches: self
                .matches
                .keys()
                .map(|key| key.names().map(str::to_string))
                .collect(),
            scores: self.scores.clone(),
            chat_history: self.chat_history.iter().cloned().collect(),
        }
    }

    /// Queue a message for one connection.
    fn to_one(&self, id: ConnId, message: ServerMessage) -> Outbox {
        match self.conns.get(&id) {
            Some(conn) => vec![Delivery {
                conn: id,
                sender: conn.sender.clone(),
                message,
            }],
            None => Vec::new(),
        }
    }

    /// Queue a message for a player by name; empty when offline.
    fn to_player(&self, name: &str, message: ServerMessage) -> Outbox {
        match self.players.get(name) {
            Some(id) => self.to_one(*id, message),
            None => Vec::new(),
        }
    }

    /// Queue a message for every connection except `except`.
    fn broadcast_except(&self, except: Option<ConnId>, message: ServerMessage) -> Outbox {
        self.conns
            .iter()
            .filter(|(id, _)| Some(**id) != except)
            .map(|(id, conn)| Delivery {
                conn: *id,
                sender: conn.sender.clone(),
                message: message.clone(),
            })
            .collect()
    }

    /// Pending challenge pairs, for inspection in tests.
    #[cfg(test)]
    fn challenge_count(&self) -> usize {
        self.challenges.len()
    }
}

// =============================================================================
// TESTS
// =============================================================================
