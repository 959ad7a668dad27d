//! Best-first (A*) search over a region of the grid.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::arena::{NodeId, ObjectPool};
use crate::error::{Error, Result};
use crate::geom::{Coord, Dir, ThreadBorders};
use crate::grid::Obstacles;
use crate::neighbors::Neighborhood;

/// A pooled search node.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SearchNode {
    /// The tile this node reached.
    pub tile: Coord,
    /// The cost of the best known path from the start.
    pub cost: u64,
    /// The estimated remaining cost to the goal.
    pub heuristic: u64,
    /// `cost + heuristic`.
    pub total: u64,
}

/// A route between two tiles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path {
    /// Every tile on the route, from start to goal.
    pub tiles: Vec<Coord>,
    /// The summed step cost.
    pub cost: u64,
}

impl Path {
    /// The number of steps taken.
    pub fn moves(&self) -> usize {
        self.tiles.len().saturating_sub(1)
    }

    /// The direction of every step.
    pub fn directions(&self) -> Vec<Dir> {
        self.tiles
            .windows(2)
            .filter_map(|w| {
                let offset = (w[1].x - w[0].x, w[1].y - w[0].y);
                Dir::ALL.into_iter().find(|d| d.offset() == offset)
            })
            .collect()
    }

    /// The number of direction changes along the route.
    pub fn turns(&self) -> usize {
        self.directions().windows(2).filter(|w| w[0] != w[1]).count()
    }
}

/// The result of a search. Failing to find a route is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchOutcome<P = Path> {
    /// A route was found.
    Found(P),
    /// The start cannot reach the goal.
    NoPath,
    /// The route would leave the searched region.
    ///
    /// The caller must re-issue the request against a region that contains it.
    NeedsHandoff,
    /// The search ran out of pooled nodes.
    NodeLimit,
}

impl<P> SearchOutcome<P> {
    /// Returns `true` if a route was found.
    pub fn is_found(&self) -> bool {
        matches!(self, SearchOutcome::Found(_))
    }

    /// The route, if one was found.
    pub fn path(&self) -> Option<&P> {
        match self {
            SearchOutcome::Found(p) => Some(p),
            _ => None,
        }
    }

    /// Maps the found route.
    pub fn map<Q>(self, f: impl FnOnce(P) -> Q) -> SearchOutcome<Q> {
        match self {
            SearchOutcome::Found(p) => SearchOutcome::Found(f(p)),
            SearchOutcome::NoPath => SearchOutcome::NoPath,
            SearchOutcome::NeedsHandoff => SearchOutcome::NeedsHandoff,
            SearchOutcome::NodeLimit => SearchOutcome::NodeLimit,
        }
    }
}

/// A routing algorithm usable by the router.
pub trait Search: Send {
    /// Searches for a route from `start` to `goal` that stays inside `region`
    /// and avoids `obstacles`.
    fn find_path(
        &mut self,
        start: Coord,
        goal: Coord,
        region: &ThreadBorders,
        obstacles: &dyn Obstacles,
    ) -> Result<SearchOutcome>;
}

/// A frontier entry. Pops the lowest `total` first, then the earliest `seq`.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct OpenEntry {
    pub(crate) total: u64,
    pub(crate) seq: u64,
    pub(crate) node: NodeId,
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for `BinaryHeap`.
        other
            .total
            .cmp(&self.total)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An A* searcher.
///
/// Owns its node pool, frontier and visited map and reuses them across
/// searches, so repeated searches of similar size do not allocate.
pub struct PathFinder {
    neighborhood: Box<dyn Neighborhood>,
    nodes: ObjectPool<SearchNode>,
    open: BinaryHeap<OpenEntry>,
    best: FxHashMap<Coord, u64>,
    closed: FxHashSet<Coord>,
    seq: u64,
    expanded: usize,
}

impl std::fmt::Debug for PathFinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathFinder")
            .field("nodes", &self.nodes.allocated())
            .field("limit", &self.nodes.limit())
            .finish()
    }
}

impl PathFinder {
    /// Creates a searcher.
    ///
    /// A search that needs more than `node_limit` live nodes ends with
    /// [`SearchOutcome::NodeLimit`].
    pub fn new(neighborhood: Box<dyn Neighborhood>, node_limit: Option<usize>) -> Self {
        Self {
            neighborhood,
            nodes: node_limit.map_or_else(ObjectPool::new, ObjectPool::with_limit),
            open: BinaryHeap::new(),
            best: FxHashMap::default(),
            closed: FxHashSet::default(),
            seq: 0,
            expanded: 0,
        }
    }

    /// The number of tiles expanded by the most recent search.
    pub fn expanded(&self) -> usize {
        self.expanded
    }

    /// The number of pool slots allocated so far.
    pub fn allocated(&self) -> usize {
        self.nodes.allocated()
    }

    fn reset(&mut self) {
        self.nodes.release_all();
        self.open.clear();
        self.best.clear();
        self.closed.clear();
        self.seq = 0;
        self.expanded = 0;
    }

    fn push(&mut self, node: SearchNode, parent: Option<NodeId>) -> Result<()> {
        let id = self.nodes.try_acquire()?;
        self.nodes[id] = node;
        self.nodes.set_parent(id, parent)?;
        self.best.insert(node.tile, node.cost);
        self.open.push(OpenEntry {
            total: node.total,
            seq: self.seq,
            node: id,
        });
        self.seq += 1;
        Ok(())
    }

    fn trace(&self, end: NodeId) -> Path {
        let mut tiles = self
            .nodes
            .ancestors(end)
            .map(|id| self.nodes[id].tile)
            .collect::<Vec<_>>();
        tiles.reverse();
        Path {
            tiles,
            cost: self.nodes[end].cost,
        }
    }

    fn search(
        &mut self,
        start: Coord,
        goal: Coord,
        region: &ThreadBorders,
        obstacles: &dyn Obstacles,
    ) -> Result<SearchOutcome> {
        if !region.contains(start) || !region.contains(goal) {
            return Ok(SearchOutcome::NeedsHandoff);
        }
        if obstacles.is_blocked(start) || obstacles.is_blocked(goal) {
            return Ok(SearchOutcome::NoPath);
        }

        let heuristic = self.neighborhood.heuristic(start, goal);
        self.push(
            SearchNode {
                tile: start,
                cost: 0,
                heuristic,
                total: heuristic,
            },
            None,
        )?;

        let mut hit_border = false;
        while let Some(OpenEntry { node: id, .. }) = self.open.pop() {
            let current = self.nodes[id];
            if !self.closed.insert(current.tile) {
                continue;
            }
            if current.tile == goal {
                return Ok(SearchOutcome::Found(self.trace(id)));
            }
            self.expanded += 1;

            for &dir in self.neighborhood.dirs() {
                let next = current.tile.step(dir);
                if obstacles.is_blocked(next) || self.closed.contains(&next) {
                    continue;
                }
                if !region.contains(next) {
                    hit_border = true;
                    continue;
                }
                let Some(step) = self.neighborhood.step_cost(current.tile, dir, obstacles) else {
                    continue;
                };
                let cost = current.cost + step;
                if self.best.get(&next).is_some_and(|&known| known <= cost) {
                    continue;
                }
                let heuristic = self.neighborhood.heuristic(next, goal);
                self.push(
                    SearchNode {
                        tile: next,
                        cost,
                        heuristic,
                        total: cost + heuristic,
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
}

impl Search for PathFinder {
    fn find_path(
        &mut self,
        start: Coord,
        goal: Coord,
        region: &ThreadBorders,
        obstacles: &dyn Obstacles,
    ) -> Result<SearchOutcome> {
        self.reset();
        let outcome = match self.search(start, goal, region, obstacles) {
            Err(Error::PoolExhausted { limit }) => {
                tracing::debug!(?start, ?goal, limit, "search exceeded node limit");
                Ok(SearchOutcome::NodeLimit)
            }
            other => other,
        };
        self.nodes.release_all();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use pathfinding::prelude::dijkstra;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;
    use crate::geom::GridDims;
    use crate::grid::{BlockedTiles, Grid};
    use crate::neighbors::{Connectivity, EightWay, FourWay};

    fn open_grid(n: i64) -> (Grid, ThreadBorders) {
        let grid = Grid::new(GridDims::new(n, n));
        let bounds = grid.bounds().unwrap();
        (grid, bounds)
    }

    #[test]
    fn four_way_path_is_manhattan_optimal() {
        let (grid, bounds) = open_grid(5);
        let mut finder = PathFinder::new(Box::new(FourWay), None);
        let outcome = finder
            .find_path(Coord::new(0, 0), Coord::new(4, 4), &bounds, &grid)
            .unwrap();
        let path = outcome.path().unwrap();
        assert_eq!(path.moves(), 8);
        assert_eq!(path.tiles.first(), Some(&Coord::new(0, 0)));
        assert_eq!(path.tiles.last(), Some(&Coord::new(4, 4)));
        assert!(path.tiles.windows(2).all(|w| w[0].manhattan(w[1]) == 1));
    }

    #[test]
    fn eight_way_path_is_diagonal_optimal() {
        let (grid, bounds) = open_grid(5);
        let mut finder = PathFinder::new(Box::new(EightWay), None);
        let outcome = finder
            .find_path(Coord::new(0, 0), Coord::new(4, 4), &bounds, &grid)
            .unwrap();
        let path = outcome.path().unwrap();
        assert_eq!(path.moves(), 4);
        assert_eq!(path.turns(), 0);
        assert_eq!(path.cost, 56);
    }

    #[test]
    fn enclosed_goal_has_no_path() {
        let goal = Coord::new(5, 5);
        let mut grid = Grid::new(GridDims::new(10, 10));
        for dir in Dir::ALL {
            grid.block(goal.step(dir));
        }
        let bounds = grid.bounds().unwrap();
        for connectivity in [Connectivity::Four, Connectivity::Eight] {
            let mut finder = PathFinder::new(connectivity.neighborhood(), None);
            let outcome = finder
                .find_path(Coord::new(0, 0), goal, &bounds, &grid)
                .unwrap();
            assert_eq!(outcome, SearchOutcome::NoPath);
        }
    }

    #[test]
    fn leaving_the_region_needs_handoff() {
        let grid = Grid::new(GridDims::new(10, 10));
        let left = ThreadBorders::new(0, 4, 0, 9).unwrap();
        let mut finder = PathFinder::new(Box::new(FourWay), None);

        let outcome = finder
            .find_path(Coord::new(1, 1), Coord::new(8, 1), &left, &grid)
            .unwrap();
        assert_eq!(outcome, SearchOutcome::NeedsHandoff);

        // A wall across the whole region forces a detour through a neighbor.
        let quadrant = ThreadBorders::new(0, 4, 0, 4).unwrap();
        let mut walled = grid.clone();
        for y in 0..=4 {
            walled.block(Coord::new(2, y));
        }
        let (start, goal) = (Coord::new(0, 2), Coord::new(4, 2));
        let outcome = finder.find_path(start, goal, &quadrant, &walled).unwrap();
        assert_eq!(outcome, SearchOutcome::NeedsHandoff);

        // Over the whole grid the detour is found.
        let outcome = finder
            .find_path(start, goal, &walled.bounds().unwrap(), &walled)
            .unwrap();
        assert_eq!(outcome.path().map(Path::moves), Some(10));
    }

    #[test]
    fn node_limit_is_reported() {
        let (grid, bounds) = open_grid(30);
        let mut finder = PathFinder::new(Box::new(FourWay), Some(16));
        let outcome = finder
            .find_path(Coord::new(0, 0), Coord::new(29, 29), &bounds, &grid)
            .unwrap();
        assert_eq!(outcome, SearchOutcome::NodeLimit);

        // The pool is usable again afterwards.
        let outcome = finder
            .find_path(Coord::new(0, 0), Coord::new(1, 1), &bounds, &grid)
            .unwrap();
        assert!(outcome.is_found());
    }

    #[test]
    fn warm_searches_do_not_allocate_nodes() {
        let (grid, bounds) = open_grid(20);
        let mut finder = PathFinder::new(Box::new(FourWay), None);
        let (start, goal) = (Coord::new(2, 3), Coord::new(17, 15));
        let first = finder.find_path(start, goal, &bounds, &grid).unwrap();
        let allocated = finder.allocated();
        let second = finder.find_path(start, goal, &bounds, &grid).unwrap();
        assert_eq!(first, second);
        assert_eq!(finder.allocated(), allocated);
    }

    fn oracle(grid: &Grid, start: Coord, goal: Coord, connectivity: Connectivity) -> Option<u64> {
        let neighborhood = connectivity.neighborhood();
        dijkstra(
            &start,
            |&tile| {
                neighborhood
                    .dirs()
                    .iter()
                    .filter(|&&dir| !grid.is_blocked(tile.step(dir)))
                    .filter_map(|&dir| {
                        neighborhood
                            .step_cost(tile, dir, grid)
                            .map(|cost| (tile.step(dir), cost))
                    })
                    .collect::<Vec<_>>()
            },
            |&tile| tile == goal,
        )
        .map(|(_, cost)| cost)
    }

    #[test]
    fn costs_match_dijkstra() {
        let mut rng = StdRng::seed_from_u64(0xa57a);
        let dims = GridDims::new(14, 11);
        for _ in 0..60 {
            let blocked: BlockedTiles = (0..40)
                .map(|_| Coord::new(rng.gen_range(0..dims.width), rng.gen_range(0..dims.height)))
                .collect();
            let grid = Grid::with_blocked(dims, blocked.iter());
            let bounds = grid.bounds().unwrap();
            let start = Coord::new(rng.gen_range(0..dims.width), rng.gen_range(0..dims.height));
            let goal = Coord::new(rng.gen_range(0..dims.width), rng.gen_range(0..dims.height));
            if grid.is_blocked(start) || grid.is_blocked(goal) {
                continue;
            }

            for connectivity in [Connectivity::Four, Connectivity::Eight] {
                let mut finder = PathFinder::new(connectivity.neighborhood(), None);
                let outcome = finder.find_path(start, goal, &bounds, &grid).unwrap();
                let expected = oracle(&grid, start, goal, connectivity);
                assert_eq!(outcome.path().map(|p| p.cost), expected);
                if let Some(path) = outcome.path() {
                    assert!(path.tiles.iter().all(|&t| !grid.is_blocked(t)));
                }
                if expected.is_none() {
                    assert_eq!(outcome, SearchOutcome::NoPath);
                }
            }
        }
    }
}
