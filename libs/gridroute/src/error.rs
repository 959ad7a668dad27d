//! Grid routing error types.

use crate::arena::NodeId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("grid has no tiles")]
    EmptyGrid,
    #[error("invalid partition: {0}")]
    Partition(String),
    #[error("node {0:?} is not live")]
    NotLive(NodeId),
    #[error("object pool exhausted at {limit} nodes")]
    PoolExhausted { limit: usize },
    #[error(transparent)]
    Parallel(#[from] parallel::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}
