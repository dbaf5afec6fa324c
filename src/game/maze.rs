//! Maze Grid Definitions
//!
//! The maze a match is raced on: a square grid of open/wall cells with
//! one goal tile and two start tiles. Immutable once generated.

use serde::{Deserialize, Serialize};

/// A cell coordinate on the maze grid.
///
/// `x` is the column, `y` the row; `(0, 0)` is the top-left corner.
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tile {
    /// Column index.
    pub x: i32,
    /// Row index.
    pub y: i32,
}

impl Tile {
    /// Create a tile from coordinates.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Squared straight-line distance to another tile.
    ///
    /// Comparing squared distances avoids floating point entirely while
    /// preserving the ordering, which is all start-tile selection needs.
    pub fn distance_squared(&self, other: Tile) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dy = (self.y - other.y) as i64;
        dx * dx + dy * dy
    }

    /// The four axis-aligned neighbors at the given step size.
    pub fn neighbors(&self, step: i32) -> [Tile; 4] {
        [
            Tile::new(self.x + step, self.y),
            Tile::new(self.x - step, self.y),
            Tile::new(self.x, self.y + step),
            Tile::new(self.x, self.y - step),
        ]
    }
}

/// An immutable generated maze.
///
/// The grid is row-major with `size * size` cells; border cells are always
/// walls. The goal tile and both start tiles lie on open cells.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maze {
    size: i32,
    cells: Vec<bool>,
    goal: Tile,
    starts: [Tile; 2],
}

impl Maze {
    /// Assemble a maze from its parts. Used by the generator.
    pub(crate) fn from_parts(size: i32, cells: Vec<bool>, goal: Tile, starts: [Tile; 2]) -> Self {
        debug_assert_eq!(cells.len(), (size * size) as usize);
        Self {
            size,
            cells,
            goal,
            starts,
        }
    }

    /// Side length of the square grid.
    pub fn size(&self) -> i32 {
        self.size
    }

    /// The goal tile both players race toward.
    pub fn goal(&self) -> Tile {
        self.goal
    }

    /// The two start tiles, in generation order.
    pub fn starts(&self) -> [Tile; 2] {
        self.starts
    }

    /// Whether the tile lies within the grid.
    pub fn in_bounds(&self, tile: Tile) -> bool {
        tile.x >= 0 && tile.x < self.size && tile.y >= 0 && tile.y < self.size
    }

    /// Whether the tile is an open (walkable) cell.
    ///
    /// Out-of-bounds tiles are not open.
    pub fn is_open(&self, tile: Tile) -> bool {
        self.in_bounds(tile) && self.cells[(tile.y * self.size + tile.x) as usize]
    }

    /// Row-major grid rows as 0/1 bytes, the wire representation.
    pub fn rows(&self) -> Vec<Vec<u8>> {
        (0..self.size)
            .map(|y| {
                (0..self.size)
                    .map(|x| u8::from(self.cells[(y * self.size + x) as usize]))
                    .collect()
            })
            .collect()
    }

    /// Count of open cells.
    pub fn open_count(&self) -> usize {
        self.cells.iter().filter(|open| **open).count()
    }
}
