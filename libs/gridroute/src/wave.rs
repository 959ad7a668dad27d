//! Lee-Moore wavefront routing with pluggable move ratings.
//!
//! The wave spreads from the source in order of accumulated rating. Its state
//! is a tile together with the direction the wave entered it, so a rating can
//! price direction changes. Every wave node records that direction, the length
//! of the current straight run and the number of turns taken so far.

use std::collections::BinaryHeap;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::arena::{NodeId, ObjectPool};
use crate::astar::{OpenEntry, Path, Search, SearchOutcome};
use crate::error::{Error, Result};
use crate::geom::{Coord, Dir, ThreadBorders};
use crate::grid::Obstacles;
use crate::neighbors::Neighborhood;

/// A candidate wave step, as presented to a [`Rating`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    /// The tile the wave is leaving.
    pub from: Coord,
    /// The tile the wave would enter.
    pub to: Coord,
    /// The direction of the step.
    pub dir: Dir,
    /// The direction the wave entered `from`, or `None` at the source.
    pub incoming: Option<Dir>,
    /// The number of consecutive steps in `incoming` that reached `from`.
    pub run: usize,
    /// The neighborhood's cost for the step.
    pub base: u64,
    /// The tile being routed to.
    pub target: Coord,
}

impl Move {
    /// Returns `true` if the step changes direction.
    pub fn is_turn(&self) -> bool {
        self.incoming.is_some_and(|d| d != self.dir)
    }

    /// Returns `true` if the step increases the distance to the target.
    pub fn moves_away(&self) -> bool {
        self.to.manhattan(self.target) > self.from.manhattan(self.target)
    }
}

/// Scores a wave step. Lower is better.
pub trait Rating: Send + Sync {
    /// The cost added by taking `mv`.
    fn rate(&self, mv: &Move) -> u64;
}

impl<F: Fn(&Move) -> u64 + Send + Sync> Rating for F {
    fn rate(&self, mv: &Move) -> u64 {
        self(mv)
    }
}

/// Charges the step cost plus `turn` for every direction change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnPenalty {
    /// The extra cost of a direction change.
    pub turn: u64,
}

impl Rating for TurnPenalty {
    fn rate(&self, mv: &Move) -> u64 {
        mv.base + if mv.is_turn() { self.turn } else { 0 }
    }
}

/// Charges the step cost plus `away` for every step that increases the
/// distance to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistancePenalty {
    /// The extra cost of moving away from the target.
    pub away: u64,
}

impl Rating for DistancePenalty {
    fn rate(&self, mv: &Move) -> u64 {
        mv.base + if mv.moves_away() { self.away } else { 0 }
    }
}

/// A pooled wave node.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WaveNode {
    /// The tile reached.
    pub tile: Coord,
    /// The direction the wave entered the tile.
    pub dir: Option<Dir>,
    /// Consecutive steps taken in `dir`.
    pub run: usize,
    /// Direction changes from the source.
    pub turns: usize,
    /// Accumulated rating.
    pub cost: u64,
}

/// A route found by the wave, with the per-tile direction record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavePath {
    /// The wave nodes along the route, from source to target.
    pub steps: Vec<WaveNode>,
    /// Direction changes along the route.
    pub turns: usize,
    /// Accumulated rating.
    pub cost: u64,
}

impl WavePath {
    /// The tiles along the route.
    pub fn tiles(&self) -> impl Iterator<Item = Coord> + '_ {
        self.steps.iter().map(|n| n.tile)
    }

    /// The direction of every step.
    pub fn directions(&self) -> Vec<Dir> {
        self.steps.iter().filter_map(|n| n.dir).collect()
    }
}

impl From<WavePath> for Path {
    fn from(value: WavePath) -> Self {
        Path {
            tiles: value.tiles().collect(),
            cost: value.cost,
        }
    }
}

type State = (Coord, Option<Dir>);

/// A Lee-Moore router.
pub struct WaveRouter {
    neighborhood: Box<dyn Neighborhood>,
    rating: Box<dyn Rating>,
    nodes: ObjectPool<WaveNode>,
    wave: BinaryHeap<OpenEntry>,
    best: FxHashMap<State, u64>,
    reached: FxHashSet<State>,
    seq: u64,
}

impl std::fmt::Debug for WaveRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveRouter")
            .field("nodes", &self.nodes.allocated())
            .field("limit", &self.nodes.limit())
            .finish()
    }
}

impl WaveRouter {
    /// Creates a router expanding along `neighborhood` and scoring steps with
    /// `rating`.
    pub fn new(
        neighborhood: Box<dyn Neighborhood>,
        rating: Box<dyn Rating>,
        node_limit: Option<usize>,
    ) -> Self {
        Self {
            neighborhood,
            rating,
            nodes: node_limit.map_or_else(ObjectPool::new, ObjectPool::with_limit),
            wave: BinaryHeap::new(),
            best: FxHashMap::default(),
            reached: FxHashSet::default(),
            seq: 0,
        }
    }

    fn reset(&mut self) {
        self.nodes.release_all();
        self.wave.clear();
        self.best.clear();
        self.reached.clear();
        self.seq = 0;
    }

    fn push(&mut self, node: WaveNode, parent: Option<NodeId>) -> Result<()> {
        let id = self.nodes.try_acquire()?;
        self.nodes[id] = node;
        self.nodes.set_parent(id, parent)?;
        self.best.insert((node.tile, node.dir), node.cost);
        self.wave.push(OpenEntry {
            total: node.cost,
            seq: self.seq,
            node: id,
        });
        self.seq += 1;
        Ok(())
    }

    fn trace(&self, end: NodeId) -> WavePath {
        let mut steps = self
            .nodes
            .ancestors(end)
            .map(|id| self.nodes[id])
            .collect::<Vec<_>>();
        steps.reverse();
        let last = self.nodes[end];
        WavePath {
            steps,
            turns: last.turns,
            cost: last.cost,
        }
    }

    fn propagate(
        &mut self,
        source: Coord,
        target: Coord,
        region: &ThreadBorders,
        obstacles: &dyn Obstacles,
    ) -> Result<SearchOutcome<WavePath>> {
        if !region.contains(source) || !region.contains(target) {
            return Ok(SearchOutcome::NeedsHandoff);
        }
        if obstacles.is_blocked(source) || obstacles.is_blocked(target) {
            return Ok(SearchOutcome::NoPath);
        }

        self.push(
            WaveNode {
                tile: source,
                ..Default::default()
            },
            None,
        )?;

        let mut hit_border = false;
        while let Some(OpenEntry { node: id, .. }) = self.wave.pop() {
            let current = self.nodes[id];
            if !self.reached.insert((current.tile, current.dir)) {
                continue;
            }
            if current.tile == target {
                return Ok(SearchOutcome::Found(self.trace(id)));
            }

            for &dir in self.neighborhood.dirs() {
                let next = current.tile.step(dir);
                if obstacles.is_blocked(next) {
                    continue;
                }
                if !region.contains(next) {
                    hit_border = true;
                    continue;
                }
                if self.reached.contains(&(next, Some(dir))) {
                    continue;
                }
                let Some(base) = self.neighborhood.step_cost(current.tile, dir, obstacles) else {
                    continue;
                };
                let mv = Move {
                    from: current.tile,
                    to: next,
                    dir,
                    incoming: current.dir,
                    run: current.run,
                    base,
                    target,
                };
                let cost = current.cost + self.rating.rate(&mv);
                if self
                    .best
                    .get(&(next, Some(dir)))
                    .is_some_and(|&known| known <= cost)
                {
                    continue;
                }
                let straight = current.dir == Some(dir);
                self.push(
                    WaveNode {
                        tile: next,
                        dir: Some(dir),
                        run: if straight { current.run + 1 } else { 1 },
                        turns: current.turns + usize::from(mv.is_turn()),
                        cost,
                    },
                    Some(id),
                )?;
            }
        }

        Ok(if hit_border {
            SearchOutcome::NeedsHandoff
        } else {
            SearchOutcome::NoPath
        })
    }

    /// Propagates a wave from `source` until it reaches `target`, staying
    /// inside `region`.
    pub fn find_wave(
        &mut self,
        source: Coord,
        target: Coord,
        region: &ThreadBorders,
        obstacles: &dyn Obstacles,
    ) -> Result<SearchOutcome<WavePath>> {
        self.reset();
        let outcome = match self.propagate(source, target, region, obstacles) {
            Err(Error::PoolExhausted { limit }) => {
                tracing::debug!(?source, ?target, limit, "wave exceeded node limit");
                Ok(SearchOutcome::NodeLimit)
            }
            other => other,
        };
        self.nodes.release_all();
        outcome
    }
}

impl Search for WaveRouter {
    fn find_path(
        &mut self,
        start: Coord,
        goal: Coord,
        region: &ThreadBorders,
        obstacles: &dyn Obstacles,
    ) -> Result<SearchOutcome> {
        Ok(self
            .find_wave(start, goal, region, obstacles)?
            .map(Path::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::GridDims;
    use crate::grid::Grid;
    use crate::neighbors::{EightWay, FourWay, ORTHOGONAL_COST};

    fn turn_router(neighborhood: Box<dyn Neighborhood>) -> WaveRouter {
        WaveRouter::new(neighborhood, Box::new(TurnPenalty { turn: 100 }), None)
    }

    #[test]
    fn straight_corridor_has_no_turns() {
        let grid = Grid::new(GridDims::new(8, 1));
        let mut router = turn_router(Box::new(FourWay));
        let outcome = router
            .find_wave(
                Coord::new(0, 0),
                Coord::new(7, 0),
                &grid.bounds().unwrap(),
                &grid,
            )
            .unwrap();
        let path = outcome.path().unwrap();
        assert_eq!(path.turns, 0);
        assert_eq!(path.directions(), vec![Dir::East; 7]);
        assert_eq!(path.steps.last().map(|n| n.run), Some(7));
        assert_eq!(path.cost, 7 * ORTHOGONAL_COST);
    }

    #[test]
    fn one_obstacle_forces_one_turn() {
        let (source, target) = (Coord::new(0, 0), Coord::new(4, 4));
        let mut grid = Grid::new(GridDims::new(5, 5));
        let mut router = turn_router(Box::new(EightWay));

        let straight = router
            .find_wave(source, target, &grid.bounds().unwrap(), &grid)
            .unwrap();
        let straight = straight.path().unwrap();
        assert_eq!(straight.turns, 0);
        assert_eq!(straight.directions(), vec![Dir::NorthEast; 4]);

        grid.block(Coord::new(2, 2));
        let bent = router
            .find_wave(source, target, &grid.bounds().unwrap(), &grid)
            .unwrap();
        let bent = bent.path().unwrap();
        assert_eq!(bent.turns, 1);
        assert_eq!(
            bent.directions().windows(2).filter(|w| w[0] != w[1]).count(),
            1
        );
        assert!(bent.tiles().all(|t| !grid.is_blocked(t)));
    }

    #[test]
    fn distance_penalty_avoids_moving_away() {
        let grid = Grid::new(GridDims::new(8, 8));
        let mut router = WaveRouter::new(
            Box::new(FourWay),
            Box::new(DistancePenalty { away: 50 }),
            None,
        );
        let target = Coord::new(5, 3);
        let outcome = router
            .find_wave(Coord::new(0, 0), target, &grid.bounds().unwrap(), &grid)
            .unwrap();
        let path = outcome.path().unwrap();
        assert_eq!(path.cost, 8 * ORTHOGONAL_COST);
        let distances = path.tiles().map(|t| t.manhattan(target)).collect::<Vec<_>>();
        assert!(distances.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn closure_ratings_plug_in() {
        let grid = Grid::new(GridDims::new(6, 6));
        // Prefer vertical moves.
        let rating = |mv: &Move| -> u64 {
            match mv.dir {
                Dir::North | Dir::South => 1,
                _ => 5,
            }
        };
        let mut router = WaveRouter::new(Box::new(FourWay), Box::new(rating), None);
        let outcome = router
            .find_path(
                Coord::new(0, 0),
                Coord::new(2, 2),
                &grid.bounds().unwrap(),
                &grid,
            )
            .unwrap();
        assert_eq!(outcome.path().map(|p| p.cost), Some(12));
    }

    #[test]
    fn walled_target_has_no_path() {
        let mut grid = Grid::new(GridDims::new(6, 6));
        for dir in Dir::ORTHOGONAL {
            grid.block(Coord::new(3, 3).step(dir));
        }
        let mut router = turn_router(Box::new(FourWay));
        let bounds = grid.bounds().unwrap();
        let outcome = router
            .find_wave(Coord::new(0, 0), Coord::new(3, 3), &bounds, &grid)
            .unwrap();
        assert_eq!(outcome, SearchOutcome::NoPath);

        let half = ThreadBorders::new(0, 2, 0, 5).unwrap();
        let outcome = router
            .find_wave(Coord::new(0, 0), Coord::new(3, 3), &half, &grid)
            .unwrap();
        assert_eq!(outcome, SearchOutcome::NeedsHandoff);
    }

    #[test]
    fn node_limit_is_reported() {
        let grid = Grid::new(GridDims::new(20, 20));
        let mut router = WaveRouter::new(
            Box::new(FourWay),
            Box::new(TurnPenalty { turn: 5 }),
            Some(8),
        );
        let outcome = router
            .find_wave(
                Coord::new(0, 0),
                Coord::new(19, 19),
                &grid.bounds().unwrap(),
                &grid,
            )
            .unwrap();
        assert_eq!(outcome, SearchOutcome::NodeLimit);
    }
}
