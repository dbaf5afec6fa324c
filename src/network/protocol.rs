//! Protocol Messages
//!
//! Wire format for client-server communication: every frame payload is a
//! JSON envelope `{"tag": ..., "data": ...}`. The tag vocabulary is closed;
//! both enums are exhaustively matched by the router so a new tag cannot be
//! added without handling it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::maze::Tile;
use crate::game::state::MatchState;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tag", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask to join with a display name.
    LoginAttempt(String),

    /// Leave the server; data is the client's own name.
    Disconnect(String),

    /// Challenge the named player to a race.
    CreateChallenge(String),

    /// Withdraw a previously issued challenge to the named player.
    DeleteChallenge(String),

    /// Accept a challenge from the named player.
    AcceptChallenge(String),

    /// Report the sender's new tile in its active match.
    ChangePosition(Tile),

    /// Leave the active match against the named opponent.
    LeavingGame(String),

    /// Report that the sender finished its maze.
    ///
    /// The historical tag grammar ("have") is preserved for client
    /// compatibility; the server-emitted counterpart uses "has".
    PlayerHaveWonAGame,

    /// Chat line for everyone.
    PublicMessage(String),

    /// Chat line for the sender's current opponent only.
    PrivateMessage(String),

    /// Liveness probe; the server echoes a heartbeat back.
    Heartbeat,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tag", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Login accepted; carries the full world snapshot.
    LoginSuccessful(LoginSnapshot),

    /// Login rejected: the name is taken or malformed.
    WrongLoginName,

    /// Somebody joined or left; carries the fresh presence set.
    UserCountChange(PresenceUpdate),

    /// The named player has challenged the recipient.
    ReceivedChallenge(String),

    /// The named player withdrew its challenge to the recipient.
    DeleteChallenge(String),

    /// A challenge involving the recipient was accepted; the race is on.
    AcceptedChallenge(MatchHandout),

    /// Both named players entered a match; any challenge involving either
    /// of them is void.
    ChallengeNoLongerValid([String; 2]),

    /// The named opponent left the recipient's match.
    LeftGame(String),

    /// The named player won a race. Sent to every connected socket.
    PlayerHasWonAGame(String),

    /// The recipient's opponent moved to this tile.
    OpponentChangedPosition(Tile),

    /// Relayed public chat line.
    PublicMessage(String),

    /// Relayed private chat line.
    PrivateMessage(String),

    /// Echo of a client heartbeat.
    Heartbeat,
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// One stored public chat line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatLine {
    /// The relayed text, verbatim.
    pub text: String,
    /// Server receive time.
    pub at: DateTime<Utc>,
}

/// Everything a freshly logged-in client needs to draw the lobby.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginSnapshot {
    /// Every online name, including the recipient's own.
    pub players: BTreeSet<String>,
    /// Player pairs currently racing.
    pub matches: Vec<[String; 2]>,
    /// Win count per online player.
    pub scores: BTreeMap<String, u32>,
    /// Recent public chat, oldest first.
    pub chat_history: Vec<ChatLine>,
}

/// Presence diff payload: the post-change online set and scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// Every online name after the change.
    pub players: BTreeSet<String>,
    /// Win count per online player.
    pub scores: BTreeMap<String, u32>,
}

/// The maze payload handed to both participants on challenge acceptance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchHandout {
    /// The recipient's opponent.
    pub opponent: String,
    /// Side length of the maze grid.
    pub size: i32,
    /// Row-major grid rows, 1 = open cell, 0 = wall.
    pub rows: Vec<Vec<u8>>,
    /// The tile both players race toward.
    pub goal: Tile,
    /// Start tile per player name.
    pub starts: BTreeMap<String, Tile>,
}

impl MatchHandout {
    /// Build the handout for one recipient of a freshly created match.
    pub fn for_recipient(state: &MatchState, opponent: &str) -> Self {
        Self {
            opponent: opponent.to_string(),
            size: state.maze.size(),
            rows: state.maze.rows(),
            goal: state.maze.goal(),
            starts: state.start_positions().clone(),
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// =============================================================================
// TESTS
// =============================================================================
