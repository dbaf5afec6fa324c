//! Deterministic Random Number Generator
//!
//! Uses Xorshift128+ algorithm for fast, high-quality, deterministic randomness.
//! Given the same seed, produces identical sequence on all platforms.

use sha2::{Digest, Sha256};

/// Deterministic PRNG using Xorshift128+ algorithm.
///
/// # Determinism Guarantee
///
/// Given the same seed, this RNG will produce the exact same sequence
/// of random numbers on any platform. Every maze is generated from a
/// seed derived with [`derive_maze_seed`], so a match's maze can be
/// regenerated exactly for debugging or dispute inspection.
///
/// # Example
///
/// ```
/// use maze_race::core::rng::DeterministicRng;
///
/// let mut rng = DeterministicRng::new(12345);
/// let value = rng.next_u64();
/// assert_eq!(value, 6233086606872742541); // Always the same!
/// ```
#[derive(Clone, Debug)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Create the RNG for a match's maze.
    ///
    /// Derives a deterministic seed from the match id and the sorted
    /// player names, so neither player can steer the maze layout.
    pub fn for_match(match_id: &[u8; 16], players: &[&str]) -> Self {
        Self::new(derive_maze_seed(match_id, players))
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random u32.
    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        self.next_u64() as u32
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        // Simple modulo - slight bias for very large max, but acceptable
        (self.next_u64() % max as u64) as u32
    }

    /// Generate a random integer in range [min, max].
    #[inline]
    pub fn next_int_range(&mut self, min: i32, max: i32) -> i32 {
        if min >= max {
            return min;
        }
        let range = (max - min + 1) as u32;
        min + self.next_int(range) as i32
    }

    /// Generate a random odd integer in range [min, max].
    ///
    /// Used for maze side lengths, which must be odd so that walls and
    /// corridors alternate cleanly.
    #[inline]
    pub fn next_odd_range(&mut self, min: i32, max: i32) -> i32 {
        let value = self.next_int_range(min, max);
        if value % 2 == 0 {
            // Nudge inward so the result stays within [min, max]
            if value + 1 <= max {
                value + 1
            } else {
                value - 1
            }
        } else {
            value
        }
    }

    /// Shuffle a slice in place using Fisher-Yates algorithm.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        let len = slice.len();
        for i in (1..len).rev() {
            let j = self.next_int((i + 1) as u32) as usize;
            slice.swap(i, j);
        }
    }

    /// Select a random element from a slice.
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            let idx = self.next_int(slice.len() as u32) as usize;
            Some(&slice[idx])
        }
    }
}

/// SplitMix64 for seed initialization.
/// Produces well-distributed values from sequential seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive a maze seed from match parameters.
///
/// This function produces a deterministic seed that:
/// 1. Is unique per match (the match id is a fresh UUID)
/// 2. Cannot be steered by either player alone
/// 3. Regenerates the exact maze after the fact
///
/// # Parameters
///
/// - `match_id`: Unique match identifier
/// - `players`: Both display names (MUST be sorted for determinism)
pub fn derive_maze_seed(match_id: &[u8; 16], players: &[&str]) -> u64 {
    let mut hasher = Sha256::new();

    // Domain separator
    hasher.update(b"MAZE_RACE_SEED_V1");

    // Match ID (unique per match)
    hasher.update(match_id);

    // Player names (sorted for determinism)
    // IMPORTANT: Caller must ensure players is sorted!
    for name in players {
        hasher.update([name.len() as u8]);
        hasher.update(name.as_bytes());
    }

    let hash = hasher.finalize();

    // Take first 8 bytes as seed
    u64::from_le_bytes(hash[0..8].try_into().expect("hash is 32 bytes"))
}

// =============================================================================
// TESTS
// =============================================================================
