//! Neighbor expansion policies.

use serde::{Deserialize, Serialize};

use crate::geom::{Coord, Dir};
use crate::grid::Obstacles;

/// The cost of one orthogonal step.
pub const ORTHOGONAL_COST: u64 = 10;
/// The cost of one diagonal step, approximating `10 * sqrt(2)`.
pub const DIAGONAL_COST: u64 = 14;

/// Which tiles are adjacent to a tile, and what moving there costs.
pub trait Neighborhood: Send + Sync {
    /// The directions a search may step in.
    fn dirs(&self) -> &'static [Dir];

    /// The cost of stepping from `from` in direction `dir`.
    ///
    /// Returns `None` if the move is not allowed even though the destination
    /// tile itself is free.
    fn step_cost(&self, from: Coord, dir: Dir, obstacles: &dyn Obstacles) -> Option<u64>;

    /// An admissible estimate of the cost from `from` to `to`.
    fn heuristic(&self, from: Coord, to: Coord) -> u64;
}

/// Four orthogonal neighbors with Manhattan distance as heuristic.
#[derive(Debug, Default, Clone, Copy)]
pub struct FourWay;

impl Neighborhood for FourWay {
    fn dirs(&self) -> &'static [Dir] {
        &Dir::ORTHOGONAL
    }

    fn step_cost(&self, _from: Coord, _dir: Dir, _obstacles: &dyn Obstacles) -> Option<u64> {
        Some(ORTHOGONAL_COST)
    }

    fn heuristic(&self, from: Coord, to: Coord) -> u64 {
        ORTHOGONAL_COST * from.manhattan(to)
    }
}

/// Eight neighbors with the octile distance as heuristic.
///
/// A diagonal step may not cut the corner of a blocked tile.
#[derive(Debug, Default, Clone, Copy)]
pub struct EightWay;

impl Neighborhood for EightWay {
    fn dirs(&self) -> &'static [Dir] {
        &Dir::ALL
    }

    fn step_cost(&self, from: Coord, dir: Dir, obstacles: &dyn Obstacles) -> Option<u64> {
        match dir.components() {
            None => Some(ORTHOGONAL_COST),
            Some((a, b)) => (!obstacles.is_blocked(from.step(a))
                && !obstacles.is_blocked(from.step(b)))
            .then_some(DIAGONAL_COST),
        }
    }

    fn heuristic(&self, from: Coord, to: Coord) -> u64 {
        let dx = from.x.abs_diff(to.x);
        let dy = from.y.abs_diff(to.y);
        ORTHOGONAL_COST * dx.max(dy) + (DIAGONAL_COST - ORTHOGONAL_COST) * dx.min(dy)
    }
}

/// A configuration-level choice of [`Neighborhood`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Connectivity {
    /// See [`FourWay`].
    #[default]
    Four,
    /// See [`EightWay`].
    Eight,
}

impl Connectivity {
    /// Constructs the neighborhood this value selects.
    pub fn neighborhood(self) -> Box<dyn Neighborhood> {
        match self {
            Connectivity::Four => Box::new(FourWay),
            Connectivity::Eight => Box::new(EightWay),
        }
    }
}
