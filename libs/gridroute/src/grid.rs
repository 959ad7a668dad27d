//! Routing grids and obstacle maps.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::geom::{Coord, GridDims, ThreadBorders};

/// A source of permanently blocked tiles.
pub trait Obstacles {
    /// Returns `true` if `tile` may not be entered.
    fn is_blocked(&self, tile: Coord) -> bool;
}

impl<T: Obstacles + ?Sized> Obstacles for &T {
    fn is_blocked(&self, tile: Coord) -> bool {
        (**self).is_blocked(tile)
    }
}

/// A sparse set of blocked tiles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTiles(FxHashSet<Coord>);

impl BlockedTiles {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks `tile`. Returns `false` if it was already blocked.
    pub fn insert(&mut self, tile: Coord) -> bool {
        self.0.insert(tile)
    }

    /// Unblocks `tile`.
    pub fn remove(&mut self, tile: Coord) -> bool {
        self.0.remove(&tile)
    }

    /// Returns `true` if `tile` is in the set.
    pub fn contains(&self, tile: Coord) -> bool {
        self.0.contains(&tile)
    }

    /// Number of blocked tiles.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no tile is blocked.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the blocked tiles in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = Coord> + '_ {
        self.0.iter().copied()
    }
}

impl Obstacles for BlockedTiles {
    fn is_blocked(&self, tile: Coord) -> bool {
        self.contains(tile)
    }
}

impl FromIterator<Coord> for BlockedTiles {
    fn from_iter<I: IntoIterator<Item = Coord>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Coord> for BlockedTiles {
    fn extend<I: IntoIterator<Item = Coord>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}

/// A finite routing grid with static obstacles.
///
/// Tiles outside the grid are reported as blocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    dims: GridDims,
    blocked: BlockedTiles,
}

impl Grid {
    /// Creates an obstacle-free grid.
    pub fn new(dims: GridDims) -> Self {
        Self {
            dims,
            blocked: BlockedTiles::new(),
        }
    }

    /// Creates a grid with the given blocked tiles.
    pub fn with_blocked(dims: GridDims, blocked: impl IntoIterator<Item = Coord>) -> Self {
        Self {
            dims,
            blocked: blocked.into_iter().collect(),
        }
    }

    /// The size of the grid.
    pub fn dims(&self) -> GridDims {
        self.dims
    }

    /// The static obstacles of the grid.
    pub fn blocked(&self) -> &BlockedTiles {
        &self.blocked
    }

    /// Blocks `tile`.
    pub fn block(&mut self, tile: Coord) {
        self.blocked.insert(tile);
    }

    /// The region covering the whole grid.
    pub fn bounds(&self) -> Option<ThreadBorders> {
        ThreadBorders::full(self.dims)
    }

    /// Returns `true` if `tile` lies on the grid.
    pub fn in_bounds(&self, tile: Coord) -> bool {
        (0..self.dims.width).contains(&tile.x) && (0..self.dims.height).contains(&tile.y)
    }
}

impl Obstacles for Grid {
    fn is_blocked(&self, tile: Coord) -> bool {
        !self.in_bounds(tile) || self.blocked.contains(tile)
    }
}

/// Two obstacle maps combined: a tile is blocked if either map blocks it.
#[derive(Debug, Clone, Copy)]
pub struct Layered<A, B> {
    /// The shared, read-only map.
    pub base: A,
    /// The caller's private map, typically tiles already used by routed wires.
    pub overlay: B,
}

impl<A, B> Layered<A, B> {
    /// Creates a new [`Layered`] map.
    pub fn new(base: A, overlay: B) -> Self {
        Self { base, overlay }
    }
}

impl<A: Obstacles, B: Obstacles> Obstacles for Layered<A, B> {
    fn is_blocked(&self, tile: Coord) -> bool {
        self.base.is_blocked(tile) || self.overlay.is_blocked(tile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_grid_tiles_are_blocked() {
        let grid = Grid::with_blocked(GridDims::new(3, 2), [Coord::new(1, 1)]);
        assert!(!grid.is_blocked(Coord::new(0, 0)));
        assert!(grid.is_blocked(Coord::new(1, 1)));
        assert!(grid.is_blocked(Coord::new(-1, 0)));
        assert!(grid.is_blocked(Coord::new(3, 0)));
        assert!(grid.is_blocked(Coord::new(0, 2)));
    }

    #[test]
    fn layered_blocks_union() {
        let grid = Grid::new(GridDims::new(4, 4));
        let used: BlockedTiles = [Coord::new(2, 2)].into_iter().collect();
        let layered = Layered::new(&grid, &used);
        assert!(layered.is_blocked(Coord::new(2, 2)));
        assert!(layered.is_blocked(Coord::new(4, 0)));
        assert!(!layered.is_blocked(Coord::new(1, 1)));
    }
}
