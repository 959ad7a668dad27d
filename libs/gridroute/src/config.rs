//! Router configuration.

use std::path::Path;

use parallel::pool::PoolConfig;
use serde::{Deserialize, Serialize};

use crate::astar::{PathFinder, Search};
use crate::error::{Error, Result};
use crate::neighbors::Connectivity;
use crate::partition::Strategy;
use crate::wave::{TurnPenalty, WaveRouter};

/// What to do with a request whose route leaves its region.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandoffPolicy {
    /// Report [`SearchOutcome::NeedsHandoff`](crate::astar::SearchOutcome::NeedsHandoff)
    /// to the caller.
    Surface,
    /// Re-route the request over the whole grid once every region has finished.
    #[default]
    RetryGlobal,
}

/// The search algorithm used inside each region.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    /// See [`PathFinder`].
    #[default]
    AStar,
    /// See [`WaveRouter`], rated with [`TurnPenalty`].
    LeeMoore,
}

/// Settings for one routing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterConfig {
    /// Worker threads in the router's pool.
    pub threads: usize,
    /// Regions the grid is cut into.
    ///
    /// Results depend on this value but not on `threads`.
    pub regions: usize,
    /// How regions are laid out.
    pub strategy: Strategy,
    /// Neighbor expansion.
    pub connectivity: Connectivity,
    /// Treatment of requests that leave their region.
    pub handoff: HandoffPolicy,
    /// Search algorithm.
    pub algorithm: Algorithm,
    /// Extra cost of a direction change for [`Algorithm::LeeMoore`].
    pub turn_cost: u64,
    /// Maximum live search nodes per search.
    pub node_limit: Option<usize>,
    /// Routes per chunk when computing metrics in parallel.
    pub chunk_size: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            threads: PoolConfig::default().threads,
            regions: 4,
            strategy: Strategy::default(),
            connectivity: Connectivity::default(),
            handoff: HandoffPolicy::default(),
            algorithm: Algorithm::default(),
            turn_cost: 20,
            node_limit: None,
            chunk_size: 64,
        }
    }
}

impl RouterConfig {
    /// Checks that every setting is usable.
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::Config("`threads` must be nonzero".to_string()));
        }
        if self.regions == 0 {
            return Err(Error::Config("`regions` must be nonzero".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("`chunk_size` must be nonzero".to_string()));
        }
        if self.node_limit == Some(0) {
            return Err(Error::Config("`node_limit` must be nonzero".to_string()));
        }
        Ok(())
    }

    /// Parses and validates a TOML configuration.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// The configuration of the router's thread pool.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            threads: self.threads,
            name: "route".to_string(),
        }
    }

    /// Constructs a fresh searcher for one worker.
    pub fn searcher(&self) -> Box<dyn Search> {
        let neighborhood = self.connectivity.neighborhood();
        match self.algorithm {
            Algorithm::AStar => Box::new(PathFinder::new(neighborhood, self.node_limit)),
            Algorithm::LeeMoore => Box::new(WaveRouter::new(
                neighborhood,
                Box::new(TurnPenalty {
                    turn: self.turn_cost,
                }),
                self.node_limit,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_toml() {
        let config = RouterConfig::from_toml_str(
            r#"
            threads = 2
            regions = 6
            strategy = "columns"
            connectivity = "eight"
            handoff = "surface"
            algorithm = "lee-moore"
            node_limit = 5000
            "#,
        )
        .unwrap();
        assert_eq!(config.threads, 2);
        assert_eq!(config.regions, 6);
        assert_eq!(config.strategy, Strategy::Columns);
        assert_eq!(config.connectivity, Connectivity::Eight);
        assert_eq!(config.handoff, HandoffPolicy::Surface);
        assert_eq!(config.algorithm, Algorithm::LeeMoore);
        assert_eq!(config.node_limit, Some(5000));
        assert_eq!(config.chunk_size, RouterConfig::default().chunk_size);
    }

    #[test]
    fn rejects_bad_settings() {
        assert!(matches!(
            RouterConfig::from_toml_str("threads = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            RouterConfig::from_toml_str("regions = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            RouterConfig::from_toml_str("thread = 3"),
            Err(Error::Toml(_))
        ));
        assert!(matches!(
            RouterConfig::from_toml_str(r#"strategy = "spiral""#),
            Err(Error::Toml(_))
        ));
    }
}
