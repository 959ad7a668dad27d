//! A small parallel runtime: a fixed-size thread pool, parallel for / reduce /
//! while patterns over splittable iteration domains, and staged pipelines.
//!
//! ```
//! use parallel::patterns::parallel_reduce;
//! use parallel::pool::{PoolConfig, ThreadPool};
//! use parallel::range::Range;
//!
//! let pool = ThreadPool::start_new(PoolConfig::with_threads(2)).unwrap();
//! let domain = Range::unit(1, 101).unwrap().chunked(10).unwrap();
//! let sum = parallel_reduce(&pool, &domain, |r| r.iter().sum::<i64>(), |a, b| a + b).unwrap();
//! assert_eq!(sum, Some(5050));
//! ```
#![warn(missing_docs)]

pub mod error;
pub mod patterns;
pub mod pipeline;
pub mod pool;
pub mod range;

pub use error::{Error, Result, TaskFault};
pub use patterns::{parallel_for, parallel_reduce, parallel_while, Feeder, WorkQueue};
pub use pipeline::{Pipeline, PipelineConfig};
pub use pool::{AbortFlag, JoinStatus, PoolConfig, PoolState, Termination, ThreadPool};
pub use range::{Block, BlockedRange, Chunked, Domain, Range};
