//! Maze Generation
//!
//! Two-phase deterministic algorithm over an odd-sized square grid:
//! a randomized depth-first carve produces a perfect maze and the goal
//! tile, then a breadth-first distance pass from the goal selects two
//! start tiles that are comparably far from the goal but maximally far
//! from each other.

use std::collections::VecDeque;

use crate::core::rng::DeterministicRng;
use crate::game::maze::{Maze, Tile};

/// Smallest supported maze side length.
pub const MIN_SIZE: i32 = 5;

/// Generate a maze of the given side length.
///
/// `size` is normalized to the nearest odd value >= [`MIN_SIZE`]; all
/// randomness comes from `rng`, so the same seed and size always produce
/// the same maze. Safe to call concurrently for different matches.
pub fn generate(size: i32, rng: &mut DeterministicRng) -> Maze {
    let size = normalize_size(size);

    let (cells, goal) = carve(size, rng);
    let starts = select_starts(size, &cells, goal);

    Maze::from_parts(size, cells, goal, starts)
}

/// Clamp to the supported minimum and force oddness.
fn normalize_size(size: i32) -> i32 {
    let size = size.max(MIN_SIZE);
    if size % 2 == 0 {
        size + 1
    } else {
        size
    }
}

/// Phase 1: randomized depth-first carve with an explicit stack.
///
/// Cells at odd coordinates are rooms; carving opens the wall cell
/// between a room and an unvisited room two steps away. The last room
/// opened becomes the goal tile. Border cells are never touched.
fn carve(size: i32, rng: &mut DeterministicRng) -> (Vec<bool>, Tile) {
    let mut cells = vec![false; (size * size) as usize];
    let open = |cells: &mut Vec<bool>, t: Tile| cells[(t.y * size + t.x) as usize] = true;
    let is_open = |cells: &[bool], t: Tile| cells[(t.y * size + t.x) as usize];

    // Random odd-coordinate room to start carving from
    let start = Tile::new(
        1 + 2 * rng.next_int(((size - 1) / 2) as u32) as i32,
        1 + 2 * rng.next_int(((size - 1) / 2) as u32) as i32,
    );

    open(&mut cells, start);

    let mut goal = start;
    let mut stack = vec![start];
    let mut directions = [(1, 0), (-1, 0), (0, 1), (0, -1)];

    while let Some(current) = stack.pop() {
        rng.shuffle(&mut directions);

        for (dx, dy) in directions {
            let next = Tile::new(current.x + dx * 2, current.y + dy * 2);
            let wall = Tile::new(current.x + dx, current.y + dy);

            if next.x > 0
                && next.x < size
                && next.y > 0
                && next.y < size
                && !is_open(&cells, next)
            {
                open(&mut cells, next);
                open(&mut cells, wall);
                goal = next;
                stack.push(next);
            }
        }
    }

    (cells, goal)
}

/// Phase 2: pick the two start tiles.
///
/// Breadth-first search from the goal assigns every reachable tile its
/// graph distance, then tiles whose distance falls within a symmetric band
/// around `2 * size` are collected. Among the collected tiles the pair
/// with the greatest squared straight-line separation becomes the starts,
/// spreading the players apart while keeping both routes to the goal
/// roughly comparable in length.
///
/// If the band holds fewer than two tiles (possible at small sizes) every
/// reachable tile except the goal is considered instead.
fn select_starts(size: i32, cells: &[bool], goal: Tile) -> [Tile; 2] {
    let is_open = |t: Tile| {
        t.x >= 0
            && t.x < size
            && t.y >= 0
            && t.y < size
            && cells[(t.y * size + t.x) as usize]
    };

    let wanted = size * 2;
    let half_band = size / 2;

    let mut queue = VecDeque::new();
    queue.push_back((goal, 1));

    let mut seen = vec![false; (size * size) as usize];
    seen[(goal.y * size + goal.x) as usize] = true;

    let mut in_band = Vec::new();
    let mut reachable = Vec::new();

    while let Some((current, distance)) = queue.pop_front() {
        if current != goal {
            reachable.push(current);
        }
        if distance >= wanted - half_band && distance <= wanted + half_band {
            in_band.push(current);
        }

        for next in current.neighbors(1) {
            if !is_open(next) || seen[(next.y * size + next.x) as usize] {
                continue;
            }
            seen[(next.y * size + next.x) as usize] = true;
            queue.push_back((next, distance + 1));
        }
    }

    let candidates = if in_band.len() >= 2 { &in_band } else { &reachable };
    farthest_pair(candidates)
}

/// The pair of tiles with the greatest squared Euclidean separation.
fn farthest_pair(tiles: &[Tile]) -> [Tile; 2] {
    let mut best = [tiles[0], tiles[tiles.len() - 1]];
    let mut best_distance = -1;

    for (i, &a) in tiles.iter().enumerate() {
        for &b in &tiles[i + 1..] {
            let distance = a.distance_squared(b);
            if distance > best_distance {
                best_distance = distance;
                best = [a, b];
            }
        }
    }

    best
}

// =============================================================================
// TESTS
// =============================================================================
