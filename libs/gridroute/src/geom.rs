//! Grid coordinates, directions and rectangular regions.

use serde::{Deserialize, Serialize};

/// A tile position on the routing grid.
#[derive(
    Debug, Default, Copy, Clone, Hash, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord,
)]
pub struct Coord {
    /// The x-coordinate.
    pub x: i64,
    /// The y-coordinate. Grows toward [`Dir::North`].
    pub y: i64,
}

impl Coord {
    /// Creates a new [`Coord`].
    #[inline]
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// The neighboring tile in direction `dir`.
    #[inline]
    pub fn step(self, dir: Dir) -> Self {
        let (dx, dy) = dir.offset();
        Self::new(self.x + dx, self.y + dy)
    }

    /// The Manhattan distance between two tiles.
    #[inline]
    pub fn manhattan(self, other: Self) -> u64 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

impl From<(i64, i64)> for Coord {
    fn from((x, y): (i64, i64)) -> Self {
        Self::new(x, y)
    }
}

/// One of the eight compass directions.
#[derive(Debug, Copy, Clone, Hash, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Dir {
    /// +y.
    North,
    /// +x, +y.
    NorthEast,
    /// +x.
    East,
    /// +x, -y.
    SouthEast,
    /// -y.
    South,
    /// -x, -y.
    SouthWest,
    /// -x.
    West,
    /// -x, +y.
    NorthWest,
}

impl Dir {
    /// The four orthogonal directions.
    pub const ORTHOGONAL: [Dir; 4] = [Dir::North, Dir::East, Dir::South, Dir::West];

    /// All eight directions, orthogonal ones first.
    pub const ALL: [Dir; 8] = [
        Dir::North,
        Dir::East,
        Dir::South,
        Dir::West,
        Dir::NorthEast,
        Dir::SouthEast,
        Dir::SouthWest,
        Dir::NorthWest,
    ];

    /// The `(dx, dy)` offset of a single step in this direction.
    pub const fn offset(self) -> (i64, i64) {
        match self {
            Dir::North => (0, 1),
            Dir::NorthEast => (1, 1),
            Dir::East => (1, 0),
            Dir::SouthEast => (1, -1),
            Dir::South => (0, -1),
            Dir::SouthWest => (-1, -1),
            Dir::West => (-1, 0),
            Dir::NorthWest => (-1, 1),
        }
    }

    /// Returns `true` for the four diagonal directions.
    pub const fn is_diagonal(self) -> bool {
        matches!(
            self,
            Dir::NorthEast | Dir::SouthEast | Dir::SouthWest | Dir::NorthWest
        )
    }

    /// The orthogonal components of a diagonal direction.
    ///
    /// Returns `None` for orthogonal directions.
    pub const fn components(self) -> Option<(Dir, Dir)> {
        match self {
            Dir::NorthEast => Some((Dir::North, Dir::East)),
            Dir::SouthEast => Some((Dir::South, Dir::East)),
            Dir::SouthWest => Some((Dir::South, Dir::West)),
            Dir::NorthWest => Some((Dir::North, Dir::West)),
            _ => None,
        }
    }
}

/// The size of a routing grid, in tiles.
#[derive(Debug, Copy, Clone, Hash, Serialize, Deserialize, PartialEq, Eq)]
pub struct GridDims {
    /// Number of columns.
    pub width: i64,
    /// Number of rows.
    pub height: i64,
}

impl GridDims {
    /// Creates a new [`GridDims`].
    pub const fn new(width: i64, height: i64) -> Self {
        Self { width, height }
    }

    /// The number of tiles in the grid.
    pub fn area(&self) -> u64 {
        (self.width.max(0) as u64) * (self.height.max(0) as u64)
    }

    /// Returns `true` if the grid has no tiles.
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// An axis-aligned, inclusive rectangle of tiles owned by one worker.
#[derive(Debug, Copy, Clone, Hash, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadBorders {
    x_low: i64,
    x_high: i64,
    y_low: i64,
    y_high: i64,
}

impl ThreadBorders {
    /// Creates a region spanning `x_low..=x_high` by `y_low..=y_high`.
    ///
    /// Returns `None` if the region would contain no tiles.
    pub fn new(x_low: i64, x_high: i64, y_low: i64, y_high: i64) -> Option<Self> {
        (x_low <= x_high && y_low <= y_high).then_some(Self {
            x_low,
            x_high,
            y_low,
            y_high,
        })
    }

    /// The region covering a whole grid, or `None` for an empty grid.
    pub fn full(dims: GridDims) -> Option<Self> {
        Self::new(0, dims.width - 1, 0, dims.height - 1)
    }

    /// The lowest x-coordinate in the region.
    #[inline]
    pub fn x_low(&self) -> i64 {
        self.x_low
    }

    /// The highest x-coordinate in the region.
    #[inline]
    pub fn x_high(&self) -> i64 {
        self.x_high
    }

    /// The lowest y-coordinate in the region.
    #[inline]
    pub fn y_low(&self) -> i64 {
        self.y_low
    }

    /// The highest y-coordinate in the region.
    #[inline]
    pub fn y_high(&self) -> i64 {
        self.y_high
    }

    /// Number of columns.
    pub fn width(&self) -> i64 {
        self.x_high - self.x_low + 1
    }

    /// Number of rows.
    pub fn height(&self) -> i64 {
        self.y_high - self.y_low + 1
    }

    /// Number of tiles.
    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Returns `true` if `tile` lies inside the region.
    #[inline]
    pub fn contains(&self, tile: Coord) -> bool {
        (self.x_low..=self.x_high).contains(&tile.x) && (self.y_low..=self.y_high).contains(&tile.y)
    }

    /// Returns `true` if `other` lies entirely inside this region.
    pub fn encloses(&self, other: &ThreadBorders) -> bool {
        self.x_low <= other.x_low
            && other.x_high <= self.x_high
            && self.y_low <= other.y_low
            && other.y_high <= self.y_high
    }

    /// Returns `true` if the two regions share at least one tile.
    pub fn intersects(&self, other: &ThreadBorders) -> bool {
        self.x_low <= other.x_high
            && other.x_low <= self.x_high
            && self.y_low <= other.y_high
            && other.y_low <= self.y_high
    }

    /// The Manhattan distance from `tile` to the nearest tile of the region.
    pub fn distance_to(&self, tile: Coord) -> u64 {
        let dx = if tile.x < self.x_low {
            self.x_low - tile.x
        } else if tile.x > self.x_high {
            tile.x - self.x_high
        } else {
            0
        };
        let dy = if tile.y < self.y_low {
            self.y_low - tile.y
        } else if tile.y > self.y_high {
            tile.y - self.y_high
        } else {
            0
        };
        (dx + dy) as u64
    }

    /// Iterates over the tiles of the region in row-major order.
    pub fn tiles(&self) -> impl Iterator<Item = Coord> + '_ {
        (self.y_low..=self.y_high)
            .flat_map(move |y| (self.x_low..=self.x_high).map(move |x| Coord::new(x, y)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borders_reject_empty_regions() {
        assert!(ThreadBorders::new(3, 2, 0, 0).is_none());
        assert!(ThreadBorders::full(GridDims::new(0, 5)).is_none());
        let b = ThreadBorders::new(2, 4, 1, 1).unwrap();
        assert_eq!((b.width(), b.height(), b.area()), (3, 1, 3));
    }

    #[test]
    fn distance_to_region() {
        let b = ThreadBorders::new(2, 4, 2, 4).unwrap();
        assert_eq!(b.distance_to(Coord::new(3, 3)), 0);
        assert_eq!(b.distance_to(Coord::new(0, 3)), 2);
        assert_eq!(b.distance_to(Coord::new(6, 7)), 5);
    }

    #[test]
    fn region_tiles_are_row_major() {
        let region = ThreadBorders::new(0, 3, 0, 7).unwrap();
        assert_eq!(region.tiles().count(), 32);
        assert_eq!(
            region.tiles().take(5).collect::<Vec<_>>(),
            vec![
                Coord::new(0, 0),
                Coord::new(1, 0),
                Coord::new(2, 0),
                Coord::new(3, 0),
                Coord::new(0, 1),
            ]
        );
    }

    #[test]
    fn diagonal_components() {
        for dir in Dir::ALL {
            match dir.components() {
                Some((a, b)) => {
                    let (dx, dy) = dir.offset();
                    let (ax, ay) = a.offset();
                    let (bx, by) = b.offset();
                    assert_eq!((ax + bx, ay + by), (dx, dy));
                    assert!(dir.is_diagonal());
                }
                None => assert!(!dir.is_diagonal()),
            }
        }
    }
}
