//! Core deterministic primitives.
//!
//! Maze generation is driven entirely by the seeded PRNG in this module,
//! so a match's maze is reproducible from its derived seed.

pub mod rng;

// Re-export core types
pub use rng::{DeterministicRng, derive_maze_seed};
