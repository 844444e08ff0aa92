//! Strategy selection and run reports

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{RunConfig, StrategyConfig};
use crate::content::ContentGenerator;
use crate::device::CpuDevice;
use crate::distributed::DistributedCombine;
use crate::error::{MxvError, Result};
use crate::offload::StagedOffload;
use crate::product::MatrixVectorMultiply;
use crate::team::{Team, TilePattern};

/// Outcome of [`execute`], serializable for `--json` output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Configuration that produced this report
    pub config: RunConfig,
    /// Strategy that ran
    pub strategy: String,
    /// Kernel variant that ran
    pub multiplier: String,
    /// Blocks per dimension
    pub num_blocks: usize,
    /// Padded dimension
    pub padded: usize,
    /// Compute-phase time in microseconds
    pub elapsed_us: u64,
    /// Content mismatches in generated operands
    pub input_mismatches: usize,
    /// Result elements that differ from the closed form (0 when verification is off)
    pub result_mismatches: usize,
    /// Product vector, N elements
    pub y: Vec<f64>,
}

impl RunReport {
    /// Whether verification found nothing wrong
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.input_mismatches == 0 && self.result_mismatches == 0
    }

    /// Compute-phase duration
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.elapsed_us)
    }
}

/// Build the configured strategy
///
/// # Errors
///
/// Any [`RunConfig::validate`] error, or a team/pattern construction error.
pub fn build_strategy(config: &RunConfig) -> Result<Box<dyn MatrixVectorMultiply>> {
    config.validate()?;
    let tiling = config.tiling()?;
    let multiplier = config.multiplier.build()?;

    let strategy: Box<dyn MatrixVectorMultiply> = match &config.strategy {
        StrategyConfig::StagedOffload {
            queue,
            device_memory,
        } => {
            let device = match device_memory {
                Some(bytes) => CpuDevice::with_capacity(multiplier, *bytes),
                None => CpuDevice::new(multiplier),
            };
            Box::new(StagedOffload::new(device, *queue).with_verification(config.verify))
        },
        StrategyConfig::DistributedTile {
            workers,
            distribution,
            ..
        } => {
            let layout = config
                .strategy
                .resolved_layout()
                .ok_or_else(|| MxvError::config("distributed strategy without a layout"))?;
            let team = Team::new(*workers, layout)?;
            let pattern = TilePattern::new(tiling, layout, *distribution)?;
            Box::new(DistributedCombine::new(team, pattern, multiplier)?.with_verification(config.verify))
        },
    };
    Ok(strategy)
}

/// Run one configured multiply end to end
///
/// # Errors
///
/// Configuration errors are returned before any compute; resource failures
/// during compute are fatal and returned as-is.
pub fn execute(config: &RunConfig) -> Result<RunReport> {
    let mut strategy = build_strategy(config)?;
    let tiling = config.tiling()?;
    let content = ContentGenerator::new(tiling);

    tracing::info!(
        strategy = strategy.strategy_name(),
        n = tiling.n(),
        block_size = tiling.block_size(),
        num_blocks = tiling.num_blocks(),
        padded = tiling.padded(),
        multiplier = %config.multiplier,
        "starting run"
    );

    let product = strategy.multiply(&content)?;
    let result_mismatches = if config.verify {
        let tolerance = config.multiplier.build()?.relative_tolerance();
        content.verify_product_within(&product.y, tolerance).len()
    } else {
        0
    };
    if result_mismatches > 0 {
        tracing::warn!(result_mismatches, "product differs from the closed form");
    }

    Ok(RunReport {
        config: config.clone(),
        strategy: strategy.strategy_name().to_string(),
        multiplier: config.multiplier.to_string(),
        num_blocks: tiling.num_blocks(),
        padded: tiling.padded(),
        elapsed_us: u64::try_from(product.elapsed_micros()).unwrap_or(u64::MAX),
        input_mismatches: product.mismatches.len(),
        result_mismatches,
        y: product.y,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::QueueMode;
    use crate::kernel::MultiplierKind;
    use crate::team::{TeamLayout, TileDistribution};

    const EXPECTED_N8: [f64; 8] = [28.0, 92.0, 156.0, 220.0, 284.0, 348.0, 412.0, 476.0];

    #[test]
    fn test_execute_offload() {
        let report = execute(&RunConfig::offload(8, 4).with_verify(true)).expect("test");
        assert_eq!(report.y, EXPECTED_N8);
        assert_eq!(report.strategy, "staged-offload");
        assert_eq!(report.num_blocks, 2);
        assert_eq!(report.padded, 8);
        assert!(report.is_clean());
    }

    #[test]
    fn test_execute_distributed() {
        let report = execute(&RunConfig::distributed(8, 4, 3).with_verify(true)).expect("test");
        assert_eq!(report.y, EXPECTED_N8);
        assert_eq!(report.strategy, "distributed-tile");
        assert!(report.is_clean());
    }

    #[test]
    fn test_execute_rejects_before_compute() {
        let err = execute(&RunConfig::offload(0, 4)).expect_err("test");
        assert!(err.is_configuration());

        let mut config = RunConfig::distributed(8, 4, 4);
        config.strategy = StrategyConfig::DistributedTile {
            workers: 4,
            layout: Some(TeamLayout::new(3, 1)),
            distribution: TileDistribution::Cyclic,
        };
        assert!(matches!(execute(&config), Err(MxvError::InvalidLayout { .. })));
    }

    #[test]
    fn test_execute_device_memory_exhausted() {
        let mut config = RunConfig::offload(8, 4);
        config.strategy = StrategyConfig::StagedOffload {
            queue: QueueMode::Deferred,
            device_memory: Some(64),
        };
        let err = execute(&config).expect_err("test");
        assert!(matches!(err, MxvError::DeviceAllocation { .. }));
    }

    #[test]
    fn test_default_run_is_exact() {
        let report = execute(&RunConfig::default().with_verify(true)).expect("test");
        assert!(report.is_clean());
        // 1023·1024² + 1024·1023/2
        assert_eq!(report.y[1023], 1_073_217_024.0);
        assert_eq!(report.y[0], 523_776.0);
    }

    #[test]
    fn test_execute_with_multiplier() {
        let report = execute(&RunConfig::distributed(8, 4, 2).with_multiplier(MultiplierKind::Loop))
            .expect("test");
        assert_eq!(report.multiplier, "loop");
        assert_eq!(report.y, EXPECTED_N8);

        let simd = RunConfig::offload(8, 4).with_multiplier(MultiplierKind::Simd);
        assert_eq!(simd.multiplier, MultiplierKind::Simd);
        if !MultiplierKind::Simd.is_available() {
            assert!(execute(&simd).expect_err("test").is_configuration());
        }
    }

    #[test]
    fn test_report_serializes() {
        let report = execute(&RunConfig::offload(4, 2)).expect("test");
        let json = serde_json::to_value(&report).expect("test");
        assert_eq!(json["num_blocks"], 2);
        assert_eq!(json["y"].as_array().map(Vec::len), Some(4));
        assert_eq!(report.elapsed(), Duration::from_micros(report.elapsed_us));
    }
}
