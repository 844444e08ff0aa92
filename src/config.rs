//! Run configuration
//!
//! A [`RunConfig`] fully describes one multiply: problem size, block size,
//! kernel variant, and which execution strategy to use. It can be built in
//! code, from CLI flags, or loaded from JSON:
//!
//! ```json
//! {
//!   "n": 64,
//!   "block_size": 4,
//!   "multiplier": "loop",
//!   "verify": true,
//!   "strategy": { "distributed_tile": { "workers": 4, "distribution": "cyclic" } }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::device::QueueMode;
use crate::error::{MxvError, Result};
use crate::kernel::MultiplierKind;
use crate::team::{TeamLayout, TileDistribution};
use crate::tiling::Tiling;

/// Default problem size for the staged-offload strategy
pub const DEFAULT_OFFLOAD_N: usize = 1024;
/// Default block size for the staged-offload strategy
pub const DEFAULT_OFFLOAD_BLOCK_SIZE: usize = 128;
/// Default problem size for the distributed strategy
pub const DEFAULT_DISTRIBUTED_N: usize = 64;
/// Default block size for the distributed strategy
pub const DEFAULT_DISTRIBUTED_BLOCK_SIZE: usize = 4;

/// Execution strategy and its parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Host-driven offload to a compute device
    StagedOffload {
        /// Queue execution mode
        #[serde(default)]
        queue: QueueMode,
        /// Device memory limit in bytes, unbounded when absent
        #[serde(default)]
        device_memory: Option<usize>,
    },
    /// Tile-owned multiply across a worker team
    DistributedTile {
        /// Team size
        workers: usize,
        /// Team layout, balanced factorization of `workers` when absent
        #[serde(default)]
        layout: Option<TeamLayout>,
        /// Tile distribution over the layout
        #[serde(default)]
        distribution: TileDistribution,
    },
}

impl StrategyConfig {
    /// Short strategy name for reports
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::StagedOffload { .. } => "staged-offload",
            Self::DistributedTile { .. } => "distributed-tile",
        }
    }

    /// Distributed-tile strategy with `workers` workers and defaults otherwise
    #[must_use]
    pub fn distributed(workers: usize) -> Self {
        Self::DistributedTile {
            workers,
            layout: None,
            distribution: TileDistribution::default(),
        }
    }

    /// Team layout, resolving an absent layout to the balanced one
    #[must_use]
    pub fn resolved_layout(&self) -> Option<TeamLayout> {
        match self {
            Self::StagedOffload { .. } => None,
            Self::DistributedTile {
                workers, layout, ..
            } => Some(layout.unwrap_or_else(|| TeamLayout::balanced(*workers))),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::StagedOffload {
            queue: QueueMode::default(),
            device_memory: None,
        }
    }
}

/// Everything needed for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Logical problem size N
    pub n: usize,
    /// Tile edge BS
    pub block_size: usize,
    /// Block kernel variant
    #[serde(default)]
    pub multiplier: MultiplierKind,
    /// Check generated operands and the result
    #[serde(default)]
    pub verify: bool,
    /// Execution strategy
    #[serde(default)]
    pub strategy: StrategyConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::offload(DEFAULT_OFFLOAD_N, DEFAULT_OFFLOAD_BLOCK_SIZE)
    }
}

impl RunConfig {
    /// Staged-offload run with a blocking queue and unbounded device memory
    #[must_use]
    pub fn offload(n: usize, block_size: usize) -> Self {
        Self {
            n,
            block_size,
            multiplier: MultiplierKind::default(),
            verify: false,
            strategy: StrategyConfig::default(),
        }
    }

    /// Distributed-tile run with a balanced layout and cyclic tiles
    #[must_use]
    pub fn distributed(n: usize, block_size: usize, workers: usize) -> Self {
        Self {
            strategy: StrategyConfig::distributed(workers),
            ..Self::offload(n, block_size)
        }
    }

    /// Builder: toggle verification
    #[must_use]
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Builder: choose the block kernel
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: MultiplierKind) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Parse a JSON config
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::ConfigParse`] for malformed JSON and any
    /// [`Self::validate`] error.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::Io`] if the file cannot be read, otherwise as
    /// [`Self::from_json_str`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| MxvError::Io {
            reason: format!("{}: {e}", path.display()),
        })?;
        Self::from_json_str(&json)
    }

    /// Serialize as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::ConfigParse`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Tiling described by `n` and `block_size`
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::InvalidConfiguration`] for zero or oversized values.
    pub fn tiling(&self) -> Result<Tiling> {
        Tiling::new(self.n, self.block_size)
    }

    /// Reject configurations that cannot run, before any compute
    ///
    /// # Errors
    ///
    /// - [`MxvError::InvalidConfiguration`]: N = 0, BS = 0, W = 0, an
    ///   unavailable kernel variant, or a zero device memory limit
    /// - [`MxvError::InvalidLayout`]: layout factors inconsistent with W
    pub fn validate(&self) -> Result<()> {
        self.tiling()?;
        if !self.multiplier.is_available() {
            return Err(MxvError::config(format!(
                "multiplier '{}' is not compiled in",
                self.multiplier
            )));
        }
        match &self.strategy {
            StrategyConfig::StagedOffload { device_memory, .. } => {
                if *device_memory == Some(0) {
                    return Err(MxvError::config("device memory limit must be positive"));
                }
            },
            StrategyConfig::DistributedTile { workers, .. } => {
                if *workers == 0 {
                    return Err(MxvError::config("worker count must be positive"));
                }
                if let Some(layout) = self.strategy.resolved_layout() {
                    layout.validate_for(*workers)?;
                }
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_offload() {
        let config = RunConfig::default();
        assert_eq!(config.n, 1024);
        assert_eq!(config.block_size, 128);
        assert_eq!(config.strategy.name(), "staged-offload");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        assert!(RunConfig::offload(0, 4).validate().is_err());
        assert!(RunConfig::offload(8, 0).validate().is_err());
        let err = RunConfig::distributed(8, 4, 0).validate().expect_err("test");
        assert!(err.is_configuration());
    }

    #[test]
    fn test_validate_rejects_inconsistent_layout() {
        let mut config = RunConfig::distributed(8, 4, 6);
        config.strategy = StrategyConfig::DistributedTile {
            workers: 6,
            layout: Some(TeamLayout::new(2, 2)),
            distribution: TileDistribution::Blocked,
        };
        assert!(matches!(config.validate(), Err(MxvError::InvalidLayout { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_device_memory() {
        let mut config = RunConfig::offload(8, 4);
        config.strategy = StrategyConfig::StagedOffload {
            queue: QueueMode::Deferred,
            device_memory: Some(0),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolved_layout_defaults_to_balanced() {
        assert_eq!(
            StrategyConfig::distributed(6).resolved_layout(),
            Some(TeamLayout::new(3, 2))
        );
        assert_eq!(StrategyConfig::default().resolved_layout(), None);
    }

    #[test]
    fn test_from_json_str_minimal() {
        let config = RunConfig::from_json_str(r#"{"n": 8, "block_size": 4}"#).expect("test");
        assert_eq!(config, RunConfig::offload(8, 4));
    }

    #[test]
    fn test_from_json_str_distributed() {
        let json = r#"{
            "n": 64,
            "block_size": 4,
            "verify": true,
            "strategy": {
                "distributed_tile": {
                    "workers": 4,
                    "layout": {"rows": 4, "cols": 1},
                    "distribution": "blocked"
                }
            }
        }"#;
        let config = RunConfig::from_json_str(json).expect("test");
        assert!(config.verify);
        assert_eq!(
            config.strategy,
            StrategyConfig::DistributedTile {
                workers: 4,
                layout: Some(TeamLayout::new(4, 1)),
                distribution: TileDistribution::Blocked,
            }
        );
    }

    #[test]
    fn test_from_json_str_errors() {
        assert!(matches!(
            RunConfig::from_json_str("{not json"),
            Err(MxvError::ConfigParse { .. })
        ));
        assert!(matches!(
            RunConfig::from_json_str(r#"{"n": 0, "block_size": 4}"#),
            Err(MxvError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_json_round_trip_through_to_json() {
        let config = RunConfig::distributed(16, 4, 2).with_verify(true);
        let json = config.to_json().expect("test");
        assert_eq!(RunConfig::from_json_str(&json).expect("test"), config);
    }

    #[test]
    fn test_from_json_file_missing() {
        let err = RunConfig::from_json_file("/nonexistent/tiled-mxv.json").expect_err("test");
        assert!(matches!(err, MxvError::Io { .. }));
    }
}
