//! Parallel routing of many wires over a partitioned grid.
//!
//! Each region is routed by one task on the router's thread pool, with its
//! own searcher and its own record of the tiles its wires use. Searches never
//! leave their region, so no tile is written by two tasks and region results
//! merge without conflicts. Requests that would leave their region are
//! handled by the configured [`HandoffPolicy`].

use std::collections::BTreeMap;
use std::sync::Arc;

use parallel::patterns::parallel_reduce;
use parallel::pool::{AbortFlag, ThreadPool};
use parallel::range::{Domain, Range};
use serde::{Deserialize, Serialize};
use tracing::{span, Level};

use crate::astar::{Path, SearchOutcome};
use crate::config::{HandoffPolicy, RouterConfig};
use crate::error::{Error, Result};
use crate::grid::{BlockedTiles, Grid, Layered};
use crate::partition::{RoutingPart, SpatialPartitioner, WireId, WorkPartition};

/// Counters describing one routing run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingStats {
    /// Regions the grid was cut into.
    pub regions: usize,
    /// Wires with a route.
    pub routed: usize,
    /// Wires without a route, including node-limited ones.
    pub failed: usize,
    /// Wires left needing a hand-off.
    pub handoffs: usize,
    /// Wires re-routed over the whole grid.
    pub retried: usize,
    /// Total steps over all routes.
    pub wirelength: u64,
}

/// The outcome of every requested wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingReport {
    /// Outcomes keyed by wire.
    pub outcomes: BTreeMap<WireId, SearchOutcome>,
    /// Summary counters.
    pub stats: RoutingStats,
}

impl RoutingReport {
    /// The routed wires and their paths, in wire order.
    pub fn routes(&self) -> impl Iterator<Item = (WireId, &Path)> + '_ {
        self.outcomes
            .iter()
            .filter_map(|(&id, outcome)| outcome.path().map(|p| (id, p)))
    }
}

struct Regions(Vec<Arc<WorkPartition>>);

impl Domain for Regions {
    type Chunk = Arc<WorkPartition>;

    fn chunks(&self) -> Vec<Arc<WorkPartition>> {
        self.0.clone()
    }
}

type Routed = Vec<(WireId, SearchOutcome)>;

/// Routes one region's queue in wire order.
fn route_region(
    partition: &WorkPartition,
    grid: &Grid,
    config: &RouterConfig,
    abort: &AbortFlag,
) -> Result<Routed> {
    let borders = partition.borders();
    let span = span!(Level::DEBUG, "route region", region = partition.index());
    let _guard = span.enter();

    let mut parts = partition.drain_until(abort).collect::<Vec<_>>();
    parts.sort_by_key(|p| p.id);

    let mut searcher = config.searcher();
    let mut used = BlockedTiles::new();
    let mut routed = Vec::with_capacity(parts.len());
    for part in parts {
        let outcome = searcher.find_path(
            part.source,
            part.target,
            &borders,
            &Layered::new(grid, &used),
        )?;
        if let Some(path) = outcome.path() {
            used.extend(path.tiles.iter().copied());
        }
        routed.push((part.id, outcome));
    }
    tracing::debug!(
        wires = routed.len(),
        found = routed.iter().filter(|(_, o)| o.is_found()).count(),
        "region routed"
    );
    Ok(routed)
}

/// Routes wires over a grid on a thread pool.
#[derive(Debug)]
pub struct GridRouter {
    config: RouterConfig,
    pool: ThreadPool,
    partitioner: SpatialPartitioner,
}

impl GridRouter {
    /// Validates `config` and starts the router's thread pool.
    pub fn new(config: RouterConfig) -> Result<Self> {
        config.validate()?;
        let pool = ThreadPool::start_new(config.pool_config())?;
        let partitioner = SpatialPartitioner::new(config.regions, config.strategy)?;
        Ok(Self {
            config,
            pool,
            partitioner,
        })
    }

    /// The router's configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// The router's thread pool.
    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// The flag that stops a running [`GridRouter::route`] between wires.
    pub fn abort_flag(&self) -> AbortFlag {
        self.pool.abort_flag()
    }

    /// Partitions `grid` and queues each wire on the region owning its source.
    pub fn submit_work(
        &self,
        wires: impl IntoIterator<Item = RoutingPart>,
        grid: &Grid,
    ) -> Result<Vec<Arc<WorkPartition>>> {
        self.partitioner.submit_work(wires, grid)
    }

    /// Routes every wire and reports the outcome of each.
    ///
    /// Wire ids must be unique. The report depends on the grid, the wires and
    /// the configuration, but not on the number of threads.
    pub fn route(
        &self,
        grid: Arc<Grid>,
        wires: impl IntoIterator<Item = RoutingPart>,
    ) -> Result<RoutingReport> {
        let span = span!(Level::INFO, "route", threads = self.pool.threads());
        let _guard = span.enter();

        let wires = wires.into_iter().collect::<Vec<_>>();
        let mut requests = BTreeMap::new();
        for wire in &wires {
            if requests.insert(wire.id, *wire).is_some() {
                return Err(Error::Config(format!("duplicate wire id {}", wire.id)));
            }
        }

        let partitions = self.submit_work(wires, &grid)?;
        let regions = partitions.len();
        let abort = self.abort_flag();
        let routed = {
            let (grid, config, abort) = (grid.clone(), self.config.clone(), abort.clone());
            parallel_reduce(
                &self.pool,
                &Regions(partitions),
                move |partition| route_region(&partition, &grid, &config, &abort),
                |a: Result<Routed>, b: Result<Routed>| {
                    let mut a = a?;
                    a.extend(b?);
                    Ok(a)
                },
            )?
            .transpose()?
            .unwrap_or_default()
        };
        if abort.is_set() {
            tracing::debug!("routing aborted");
            return Err(parallel::Error::Aborted.into());
        }

        let mut stats = RoutingStats {
            regions,
            ..Default::default()
        };
        // Regions are disjoint and searches never leave their region, so the
        // region routes cannot overlap and merge by wire id alone.
        let mut used = BlockedTiles::new();
        let mut outcomes = routed.into_iter().collect::<BTreeMap<_, _>>();
        for path in outcomes.values().filter_map(SearchOutcome::path) {
            used.extend(path.tiles.iter().copied());
        }

        if self.config.handoff == HandoffPolicy::RetryGlobal {
            let bounds = grid.bounds().ok_or(Error::EmptyGrid)?;
            let mut searcher = self.config.searcher();
            for (&id, outcome) in outcomes.iter_mut() {
                if *outcome != SearchOutcome::NeedsHandoff {
                    continue;
                }
                if abort.is_set() {
                    return Err(parallel::Error::Aborted.into());
                }
                let wire = requests[&id];
                *outcome = searcher.find_path(
                    wire.source,
                    wire.target,
                    &bounds,
                    &Layered::new(&*grid, &used),
                )?;
                if let Some(path) = outcome.path() {
                    used.extend(path.tiles.iter().copied());
                }
                stats.retried += 1;
                tracing::debug!(wire = id, found = outcome.is_found(), "handoff retried");
            }
        }

        for outcome in outcomes.values() {
            match outcome {
                SearchOutcome::Found(_) => stats.routed += 1,
                SearchOutcome::NeedsHandoff => stats.handoffs += 1,
                SearchOutcome::NoPath | SearchOutcome::NodeLimit => stats.failed += 1,
            }
        }
        let mut report = RoutingReport { outcomes, stats };
        report.stats.wirelength = self.total_wirelength(&report)?;
        tracing::info!(?report.stats, "routing finished");
        Ok(report)
    }

    /// Sums the number of steps of every route in `report` on the pool.
    pub fn total_wirelength(&self, report: &RoutingReport) -> Result<u64> {
        let lengths = Arc::new(
            report
                .routes()
                .map(|(_, path)| path.moves() as u64)
                .collect::<Vec<_>>(),
        );
        let domain = Range::unit(0, lengths.len() as i64)?.chunked(self.config.chunk_size)?;
        let total = parallel_reduce(
            &self.pool,
            &domain,
            move |chunk| chunk.iter().map(|i| lengths[i as usize]).sum::<u64>(),
            |a, b| a + b,
        )?;
        Ok(total.unwrap_or(0))
    }
}
