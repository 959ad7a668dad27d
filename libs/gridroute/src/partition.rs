//! Spatial partitioning of a routing grid into worker-owned regions.
//!
//! A partition is a set of [`ThreadBorders`] that are pairwise disjoint and
//! together cover every tile of the grid. [`verify_cover`] checks this for
//! every partition [`SpatialPartitioner`] builds, so a worker routing inside
//! its own region can never write a tile another worker owns.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use itertools::Itertools;
use parallel::pool::AbortFlag;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geom::{Coord, GridDims, ThreadBorders};
use crate::grid::Grid;

/// Identifies one routing request.
pub type WireId = usize;

/// How a grid is cut into regions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Horizontal bands stacked along y.
    Rows,
    /// Vertical bands side by side along x.
    Columns,
    /// A two-dimensional tiling, as close to square as the region count allows.
    #[default]
    Tiles,
}

/// A request to connect two tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingPart {
    /// The wire being routed.
    pub id: WireId,
    /// Where the wire starts. Decides which region routes it.
    pub source: Coord,
    /// Where the wire ends.
    pub target: Coord,
}

impl RoutingPart {
    /// Creates a new [`RoutingPart`].
    pub fn new(id: WireId, source: impl Into<Coord>, target: impl Into<Coord>) -> Self {
        Self {
            id,
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Splits `0..extent` into at most `n` contiguous, inclusive bands of
/// near-equal size.
///
/// Earlier bands receive the remainder. Fewer than `n` bands are returned if
/// `extent < n`.
pub fn bands(extent: i64, n: usize) -> Vec<(i64, i64)> {
    if extent <= 0 || n == 0 {
        return Vec::new();
    }
    let n = (n as i64).min(extent);
    let (base, extra) = (extent / n, extent % n);
    let mut lo = 0;
    (0..n)
        .map(|i| {
            let hi = lo + base + i64::from(i < extra) - 1;
            let band = (lo, hi);
            lo = hi + 1;
            band
        })
        .collect()
}

/// Chooses a `(columns, rows)` factorization of `n` for a `width x height` grid.
fn tiling(n: usize, dims: GridDims) -> (usize, usize) {
    let small = (1..=n)
        .take_while(|d| d * d <= n)
        .filter(|d| n % d == 0)
        .last()
        .unwrap_or(1);
    let large = n / small;
    if dims.width >= dims.height {
        (large, small)
    } else {
        (small, large)
    }
}

/// Partitions `dims` into up to `n` regions using `strategy`.
///
/// Regions are returned in row-major order (by `y`, then `x`). Fewer than `n`
/// regions are produced when the grid is too small to give every region a
/// tile.
pub fn partition(dims: GridDims, n: usize, strategy: Strategy) -> Result<Vec<ThreadBorders>> {
    if n == 0 {
        return Err(Error::Config("region count must be nonzero".to_string()));
    }
    if dims.is_empty() {
        return Err(Error::EmptyGrid);
    }
    let (columns, rows) = match strategy {
        Strategy::Rows => (1, n),
        Strategy::Columns => (n, 1),
        Strategy::Tiles => tiling(n, dims),
    };
    let xs = bands(dims.width, columns);
    let ys = bands(dims.height, rows);
    let regions = ys
        .iter()
        .cartesian_product(xs.iter())
        .filter_map(|(&(y_low, y_high), &(x_low, x_high))| {
            ThreadBorders::new(x_low, x_high, y_low, y_high)
        })
        .collect::<Vec<_>>();
    if regions.len() < n {
        tracing::debug!(
            requested = n,
            produced = regions.len(),
            "grid too small for requested region count"
        );
    }
    verify_cover(dims, &regions)?;
    Ok(regions)
}

/// Checks that `regions` are pairwise disjoint, lie on the grid and cover it.
pub fn verify_cover(dims: GridDims, regions: &[ThreadBorders]) -> Result<()> {
    let bounds = ThreadBorders::full(dims).ok_or(Error::EmptyGrid)?;
    if let Some((i, _)) = regions
        .iter()
        .find_position(|region| !bounds.encloses(region))
    {
        return Err(Error::Partition(format!("region {i} extends past the grid")));
    }
    if let Some(((i, _), (j, _))) = regions
        .iter()
        .enumerate()
        .tuple_combinations()
        .find(|((_, a), (_, b))| a.intersects(b))
    {
        return Err(Error::Partition(format!("regions {i} and {j} overlap")));
    }
    let covered: u64 = regions.iter().map(ThreadBorders::area).sum();
    if covered != dims.area() {
        return Err(Error::Partition(format!(
            "regions cover {covered} of {} tiles",
            dims.area()
        )));
    }
    Ok(())
}

/// The index of the region that should route work starting at `tile`.
///
/// This is the region containing `tile`, or else the nearest region by
/// Manhattan distance, ties going to the lowest index. Returns `None` only if
/// `regions` is empty.
pub fn assign(regions: &[ThreadBorders], tile: Coord) -> Option<usize> {
    regions
        .iter()
        .position(|region| region.contains(tile))
        .or_else(|| {
            regions
                .iter()
                .enumerate()
                .min_by_key(|&(i, region)| (region.distance_to(tile), i))
                .map(|(i, _)| i)
        })
}

/// One region and the queue of work its worker drains.
#[derive(Debug)]
pub struct WorkPartition {
    index: usize,
    borders: ThreadBorders,
    s: Sender<RoutingPart>,
    r: Receiver<RoutingPart>,
}

impl WorkPartition {
    /// Creates an empty partition for `borders`.
    pub fn new(index: usize, borders: ThreadBorders) -> Self {
        let (s, r) = crossbeam_channel::unbounded();
        Self {
            index,
            borders,
            s,
            r,
        }
    }

    /// The position of this partition in its partitioning.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The region owned by this partition.
    pub fn borders(&self) -> ThreadBorders {
        self.borders
    }

    /// Queues a routing request.
    pub fn push(&self, part: RoutingPart) {
        // Both ends live in `self`.
        let _ = self.s.send(part);
    }

    /// Takes the next queued request without blocking.
    pub fn pop(&self) -> Option<RoutingPart> {
        self.r.try_recv().ok()
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.r.len()
    }

    /// Returns `true` if no requests are queued.
    pub fn is_empty(&self) -> bool {
        self.r.is_empty()
    }

    /// Pops requests until the queue is empty or `abort` is requested.
    pub fn drain_until<'a>(
        &'a self,
        abort: &'a AbortFlag,
    ) -> impl Iterator<Item = RoutingPart> + 'a {
        std::iter::from_fn(move || if abort.is_set() { None } else { self.pop() })
    }
}

/// Builds a [`WorkPartition`] per region and distributes work among them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpatialPartitioner {
    regions: usize,
    strategy: Strategy,
}

impl SpatialPartitioner {
    /// Creates a partitioner producing up to `regions` regions.
    pub fn new(regions: usize, strategy: Strategy) -> Result<Self> {
        if regions == 0 {
            return Err(Error::Config("region count must be nonzero".to_string()));
        }
        Ok(Self { regions, strategy })
    }

    /// The requested region count.
    pub fn regions(&self) -> usize {
        self.regions
    }

    /// The partitioning strategy.
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Partitions `grid` and queues every item on the region that owns its source.
    pub fn submit_work(
        &self,
        items: impl IntoIterator<Item = RoutingPart>,
        grid: &Grid,
    ) -> Result<Vec<Arc<WorkPartition>>> {
        let borders = partition(grid.dims(), self.regions, self.strategy)?;
        let partitions = borders
            .iter()
            .enumerate()
            .map(|(i, &b)| Arc::new(WorkPartition::new(i, b)))
            .collect::<Vec<_>>();
        for item in items {
            let index = assign(&borders, item.source).ok_or(Error::EmptyGrid)?;
            partitions[index].push(item);
        }
        for p in &partitions {
            tracing::debug!(
                region = p.index(),
                borders = ?p.borders(),
                items = p.len(),
                "partition filled"
            );
        }
        Ok(partitions)
    }
}
