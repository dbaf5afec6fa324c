//! Maze Race Domain Module
//!
//! Maze data, maze generation, and active match state. No I/O here;
//! everything is driven by the network layer and is deterministic given
//! a seed.
//!
//! ## Module Structure
//!
//! - `maze`: Tile grid, goal tile, start-tile pair
//! - `generator`: Carving and start-tile selection
//! - `state`: Per-pair match state (positions, winner)

pub mod generator;
pub mod maze;
pub mod state;

// Re-export key types
pub use maze::{Maze, Tile};
pub use state::{MatchState, PairKey};
