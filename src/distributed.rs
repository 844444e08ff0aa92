//! Distributed tile-combine pipeline
//!
//! Every worker owns a subset of A's tiles and computes partial row sums for
//! them. The partials are then routed to the worker that owns each row and
//! reduced there:
//!
//! 1. **Init**: fill owned tiles and the owned part of `x`; `y` is zero.
//! 2. **Local compute**: copy all of `x` locally, run the block kernel over
//!    owned tiles (block-row major) into a per-row-block partial buffer.
//! 3. **Scatter**: collectively allocate a zero-filled `(N, W)` staging
//!    matrix; worker `w` writes its partials for row `r` at `(r, w)`.
//! 4. **Reduce**: each worker sums its own staging rows across all W columns
//!    into `y`.
//!
//! Barriers separate the phases. `y` and the staging matrix share the same
//! blocked row distribution, so the final writes into `y` stay local.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::content::{ContentGenerator, Mismatch, Operand};
use crate::error::{MxvError, Result};
use crate::kernel::BlockMultiplier;
use crate::product::{MatrixVectorMultiply, Product};
use crate::team::{CollectiveSlot, GlobalArray, StagingMatrix, Team, TilePattern, WorkerContext};
use crate::tiling::BlockCoord;

/// Per-worker account of one combine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSummary {
    /// Worker id
    pub worker: usize,
    /// Tiles the worker owned and multiplied
    pub owned_blocks: usize,
    /// Distinct rows (< N) the worker contributed partial sums to
    pub touched_rows: usize,
    /// Partial sums for padded rows (≥ N) that were not exactly zero
    pub padding_nonzero: usize,
    /// Compute-phase time seen by this worker
    pub elapsed: Duration,
}

/// Result of [`DistributedCombine::combine`]
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedOutcome {
    /// Product vector, timing and mismatches
    pub product: Product,
    /// One entry per worker, in id order
    pub workers: Vec<WorkerSummary>,
}

struct WorkerOutput {
    summary: WorkerSummary,
    mismatches: Vec<Mismatch>,
}

/// `y = A·x` over a worker team with tile-owned A
pub struct DistributedCombine {
    team: Team,
    pattern: TilePattern,
    multiplier: Arc<dyn BlockMultiplier>,
    verify: bool,
}

impl std::fmt::Debug for DistributedCombine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedCombine")
            .field("team", &self.team)
            .field("multiplier", &self.multiplier.name())
            .field("verify", &self.verify)
            .finish_non_exhaustive()
    }
}

impl DistributedCombine {
    /// Combine over `team` with tiles placed by `pattern`
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::InvalidConfiguration`] if the pattern was built for
    /// a different team size.
    pub fn new(team: Team, pattern: TilePattern, multiplier: Arc<dyn BlockMultiplier>) -> Result<Self> {
        if pattern.team_size() != team.size() {
            return Err(MxvError::config(format!(
                "tile pattern covers {} workers, team has {}",
                pattern.team_size(),
                team.size()
            )));
        }
        Ok(Self {
            team,
            pattern,
            multiplier,
            verify: false,
        })
    }

    /// Check generated tiles, `x` and padded partial sums while running
    #[must_use]
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// The worker team
    #[must_use]
    pub fn team(&self) -> &Team {
        &self.team
    }

    /// Tile ownership
    #[must_use]
    pub fn pattern(&self) -> &TilePattern {
        &self.pattern
    }

    /// Run all four phases on the team
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::InvalidShape`] when `content` is tiled differently
    /// from the pattern, and any allocation or worker failure.
    pub fn combine(&self, content: &ContentGenerator) -> Result<DistributedOutcome> {
        let tiling = *content.tiling();
        if &tiling != self.pattern.tiling() {
            return Err(MxvError::shape(format!(
                "content tiling N={} BS={} differs from pattern tiling N={} BS={}",
                tiling.n(),
                tiling.block_size(),
                self.pattern.tiling().n(),
                self.pattern.tiling().block_size()
            )));
        }

        let workers = self.team.size();
        let x = GlobalArray::zeroed(tiling.padded(), workers)?;
        let y = GlobalArray::zeroed(tiling.n(), workers)?;
        let staging_slot = CollectiveSlot::new();

        let outputs = self.team.run(|ctx| {
            self.run_worker(ctx, content, &x, &y, &staging_slot)
        })?;

        let elapsed = outputs
            .iter()
            .map(|out| out.summary.elapsed)
            .max()
            .unwrap_or_default();
        let mut mismatches = Vec::new();
        let mut summaries = Vec::with_capacity(outputs.len());
        for out in outputs {
            mismatches.extend(out.mismatches);
            summaries.push(out.summary);
        }

        tracing::info!(
            workers,
            layout = %self.team.layout(),
            n = tiling.n(),
            block_size = tiling.block_size(),
            elapsed_us = elapsed.as_micros() as u64,
            "distributed combine complete"
        );

        Ok(DistributedOutcome {
            product: Product {
                y: y.copy_to_vec(),
                elapsed,
                mismatches,
            },
            workers: summaries,
        })
    }

    fn run_worker(
        &self,
        ctx: &WorkerContext<'_>,
        content: &ContentGenerator,
        x: &GlobalArray,
        y: &GlobalArray,
        staging_slot: &CollectiveSlot<StagingMatrix>,
    ) -> Result<WorkerOutput> {
        let tiling = content.tiling();
        let bs = tiling.block_size();
        let n = tiling.n();
        let me = ctx.id();
        let verify = self.verify;

        // Init: owned tiles live only in this worker's memory
        let tiles: Vec<(BlockCoord, Vec<f64>)> = self
            .pattern
            .local_blocks(me)
            .into_iter()
            .map(|block| {
                let mut tile = vec![0.0; tiling.block_elements()];
                content.fill_matrix_block(block, &mut tile);
                (block, tile)
            })
            .collect();
        for index in x.local_range(me) {
            x.put(index, content.x_value(index))?;
        }

        let mut mismatches = Vec::new();
        if verify {
            for (block, tile) in &tiles {
                mismatches.extend(content.verify_matrix_block(*block, tile));
            }
        }
        ctx.barrier()?;

        // Local compute; x verification is excluded from the timed region
        let copy_start = Instant::now();
        let x_local = x.copy_to_vec();
        let copy_time = copy_start.elapsed();
        if verify && me == 0 {
            for index in 0..tiling.num_blocks() {
                let range = tiling.vector_block_range(index);
                mismatches.extend(content.verify_vector_block(
                    Operand::X,
                    index,
                    content.x_fill(),
                    content.x_pad(),
                    &x_local[range],
                ));
            }
            mismatches.extend(
                y.copy_to_vec()
                    .iter()
                    .enumerate()
                    .filter(|&(_, &v)| v != 0.0)
                    .map(|(row, &observed)| Mismatch {
                        operand: Operand::Y,
                        row,
                        col: None,
                        expected: 0.0,
                        observed,
                    }),
            );
        }

        let start = Instant::now();
        let mut partials: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
        for (block, tile) in &tiles {
            let acc = partials.entry(block.row).or_insert_with(|| vec![0.0; bs]);
            self.multiplier.multiply_block(
                acc,
                tile,
                &x_local[tiling.vector_block_range(block.col)],
                bs,
            )?;
        }
        tracing::debug!(
            worker = me,
            tiles = tiles.len(),
            row_blocks = partials.len(),
            "local compute done"
        );

        // Scatter
        let workers = ctx.team_size();
        let staging = ctx.collective(staging_slot, || StagingMatrix::zeroed(n, workers, workers))?;
        let mut touched_rows = 0;
        let mut padding_nonzero = 0;
        for (&block_row, values) in &partials {
            for (local, &value) in values.iter().enumerate() {
                let row = tiling.to_global(block_row, local);
                if row < staging.rows() {
                    staging.put(row, me, value)?;
                    touched_rows += 1;
                } else if value != 0.0 {
                    // Padded rows never reach staging
                    padding_nonzero += 1;
                    if verify {
                        mismatches.push(Mismatch {
                            operand: Operand::Y,
                            row,
                            col: None,
                            expected: 0.0,
                            observed: value,
                        });
                    }
                }
            }
        }
        ctx.barrier()?;

        // Reduce
        for row in staging.local_rows(me) {
            y.put(row, staging.row_sum_local(me, row)?)?;
        }
        ctx.barrier()?;
        let elapsed = copy_time + start.elapsed();
        tracing::debug!(worker = me, rows = staging.local_rows(me).len(), "reduce done");

        Ok(WorkerOutput {
            summary: WorkerSummary {
                worker: me,
                owned_blocks: tiles.len(),
                touched_rows,
                padding_nonzero,
                elapsed,
            },
            mismatches,
        })
    }
}

impl MatrixVectorMultiply for DistributedCombine {
    fn strategy_name(&self) -> &'static str {
        "distributed-tile"
    }

    fn multiply(&mut self, content: &ContentGenerator) -> Result<Product> {
        self.combine(content).map(|outcome| outcome.product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::LoopMultiplier;
    use crate::product::direct_product;
    use crate::team::{TeamLayout, TileDistribution};
    use crate::tiling::Tiling;

    fn combine(n: usize, bs: usize, workers: usize, distribution: TileDistribution) -> DistributedCombine {
        let tiling = Tiling::new(n, bs).expect("test");
        let layout = TeamLayout::balanced(workers);
        let team = Team::new(workers, layout).expect("test");
        let pattern = TilePattern::new(tiling, layout, distribution).expect("test");
        DistributedCombine::new(team, pattern, Arc::new(LoopMultiplier)).expect("test")
    }

    #[test]
    fn test_combine_known_vector() {
        let content = ContentGenerator::new(Tiling::new(8, 4).expect("test"));
        for workers in [1, 2, 4] {
            let outcome = combine(8, 4, workers, TileDistribution::Cyclic)
                .with_verification(true)
                .combine(&content)
                .expect("test");
            assert_eq!(
                outcome.product.y,
                vec![28.0, 92.0, 156.0, 220.0, 284.0, 348.0, 412.0, 476.0]
            );
            assert!(outcome.product.mismatches.is_empty());
            assert_eq!(outcome.workers.len(), workers);
        }
    }

    #[test]
    fn test_combine_single_worker_matches_direct() {
        let content = ContentGenerator::new(Tiling::new(13, 4).expect("test"));
        let outcome = combine(13, 4, 1, TileDistribution::Blocked)
            .combine(&content)
            .expect("test");
        assert_eq!(outcome.product.y, direct_product(&content));
        assert_eq!(outcome.workers[0].owned_blocks, 16);
        assert_eq!(outcome.workers[0].touched_rows, 13);
    }

    #[test]
    fn test_combine_padding_case() {
        let content = ContentGenerator::new(Tiling::new(5, 4).expect("test"));
        let outcome = combine(5, 4, 3, TileDistribution::Cyclic)
            .with_verification(true)
            .combine(&content)
            .expect("test");
        assert_eq!(outcome.product.y, direct_product(&content));
        assert!(outcome.product.validate(&content).is_empty());
    }

    #[test]
    fn test_combine_padded_rows_stay_out_of_staging() {
        // Block row 1 holds row 4 and padded rows 5..8
        let content = ContentGenerator::new(Tiling::new(5, 4).expect("test")).with_vector_values(1.0, 7.0);
        let outcome = combine(5, 4, 2, TileDistribution::Cyclic)
            .with_verification(true)
            .combine(&content)
            .expect("test");
        let touched: Vec<usize> = outcome.workers.iter().map(|w| w.touched_rows).collect();
        assert_eq!(touched, vec![4, 1]);
        assert!(outcome.workers.iter().all(|w| w.padding_nonzero == 0));
        assert!(outcome.product.mismatches.is_empty());
        assert_eq!(outcome.product.y, vec![10.0, 35.0, 60.0, 85.0, 110.0]);
    }

    #[test]
    fn test_combine_idle_workers_contribute_nothing() {
        // One tile, four workers: three own nothing
        let content = ContentGenerator::new(Tiling::new(3, 4).expect("test"));
        let outcome = combine(3, 4, 4, TileDistribution::Cyclic)
            .combine(&content)
            .expect("test");
        assert_eq!(outcome.product.y, vec![3.0, 12.0, 21.0]);
        let owned: Vec<usize> = outcome.workers.iter().map(|w| w.owned_blocks).collect();
        assert_eq!(owned, vec![1, 0, 0, 0]);
    }

    #[test]
    fn test_combine_explicit_owner_map() {
        let tiling = Tiling::new(9, 3).expect("test");
        let content = ContentGenerator::new(tiling);
        let pattern =
            TilePattern::from_owners(tiling, 3, vec![2, 2, 2, 0, 1, 0, 1, 1, 2]).expect("test");
        let team = Team::new(3, TeamLayout::new(3, 1)).expect("test");
        let combine = DistributedCombine::new(team, pattern, Arc::new(LoopMultiplier)).expect("test");
        let outcome = combine.combine(&content).expect("test");
        assert_eq!(outcome.product.y, direct_product(&content));
    }

    #[test]
    fn test_combine_rejects_mismatched_pattern() {
        let tiling = Tiling::new(8, 4).expect("test");
        let pattern = TilePattern::new(tiling, TeamLayout::new(2, 1), TileDistribution::Cyclic)
            .expect("test");
        let team = Team::new(4, TeamLayout::balanced(4)).expect("test");
        assert!(DistributedCombine::new(team, pattern, Arc::new(LoopMultiplier)).is_err());

        let other = ContentGenerator::new(Tiling::new(8, 2).expect("test"));
        let err = combine(8, 4, 2, TileDistribution::Cyclic)
            .combine(&other)
            .expect_err("test");
        assert!(matches!(err, MxvError::InvalidShape { .. }));
    }

    #[test]
    fn test_combine_through_capability() {
        let content = ContentGenerator::new(Tiling::new(8, 4).expect("test"));
        let mut strategy = combine(8, 4, 2, TileDistribution::Blocked).with_verification(true);
        assert_eq!(strategy.strategy_name(), "distributed-tile");
        let product = MatrixVectorMultiply::multiply(&mut strategy, &content).expect("test");
        assert!(product.validate(&content).is_empty());
    }
}
