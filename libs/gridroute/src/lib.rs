//! Memory-pooled grid routing on a parallel runtime.
//!
//! A [`GridRouter`] cuts a [`Grid`] into disjoint regions, queues every wire on
//! the region owning its source and routes each region on its own worker with
//! an A* ([`PathFinder`]) or Lee-Moore ([`WaveRouter`]) searcher. Searchers draw
//! their nodes from an [`ObjectPool`] so that the search loop does not allocate
//! once warmed up.
//!
//! ```
//! use std::sync::Arc;
//!
//! use gridroute::{GridDims, Grid, GridRouter, RouterConfig, RoutingPart};
//!
//! let router = GridRouter::new(RouterConfig {
//!     threads: 2,
//!     regions: 2,
//!     ..Default::default()
//! })
//! .unwrap();
//! let grid = Arc::new(Grid::new(GridDims::new(16, 16)));
//! let report = router
//!     .route(grid, [RoutingPart::new(0, (1, 1), (14, 12))])
//!     .unwrap();
//! assert_eq!(report.stats.routed, 1);
//! ```
#![warn(missing_docs)]

pub mod arena;
pub mod astar;
pub mod config;
pub mod error;
pub mod geom;
pub mod grid;
pub mod neighbors;
pub mod partition;
pub mod router;
pub mod wave;


pub use arena::{NodeId, ObjectPool};
pub use astar::{Path, PathFinder, Search, SearchOutcome};
pub use config::{Algorithm, HandoffPolicy, RouterConfig};
pub use error::{Error, Result};
pub use geom::{Coord, Dir, GridDims, ThreadBorders};
pub use grid::{BlockedTiles, Grid, Layered, Obstacles};
pub use neighbors::{Connectivity, EightWay, FourWay, Neighborhood};
pub use partition::{RoutingPart, SpatialPartitioner, Strategy, WireId, WorkPartition};
pub use router::{GridRouter, RoutingReport, RoutingStats};
pub use wave::{DistancePenalty, Rating, TurnPenalty, WavePath, WaveRouter};
