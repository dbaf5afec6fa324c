//! # Maze Race Server
//!
//! Session, presence, and matchmaking server for real-time two-player maze
//! races over persistent framed TCP connections.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    MAZE RACE SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  └── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │                                                              │
//! │  game/           - Maze race domain (no I/O)                 │
//! │  ├── maze.rs     - Tile grid, goal, start pair               │
//! │  ├── generator.rs- Carve + start-tile selection              │
//! │  └── state.rs    - Active match state per player pair        │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── framing.rs  - Length-prefixed wire frames               │
//! │  ├── protocol.rs - Tagged message envelopes                  │
//! │  ├── registry.rs - Presence, challenges, matches, chat       │
//! │  └── server.rs   - TCP server, workers, heartbeat sweep      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency model
//!
//! One reader task and one writer task per accepted connection. All shared
//! state (who is online, pending challenges, active matches, scores, chat
//! history) lives in a single [`network::registry::Registry`] behind one
//! mutex. Handlers mutate under the lock and return an outbox of messages
//! that is flushed only after the lock is released, so no network write
//! ever happens while the lock is held. A periodic heartbeat sweep reclaims
//! connections that have gone silent, through the same teardown cascade
//! used for ordinary disconnects.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::core::rng::DeterministicRng;
pub use game::maze::{Maze, Tile};
pub use game::state::{MatchState, PairKey};
pub use network::protocol::{ClientMessage, ServerMessage};
pub use network::server::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum display name length accepted at login
pub const MAX_NAME_LEN: usize = 8;
