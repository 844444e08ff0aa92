//! Staged-offload pipeline
//!
//! Executes `y = A·x` on a device whose memory is disjoint from the host's.
//! Three device buffers (y block, A block, x block) are allocated once and
//! reused for the whole block grid:
//!
//! ```text
//! for block_row in 0..NBS:
//!     y_dev  <- y[block_row]                      (once per block row)
//!     for block_col in 0..NBS:
//!         A_dev <- A[block_row, block_col]
//!         x_dev <- x[block_col]
//!         launch  y_dev += A_dev · x_dev           (BS row-units)
//!     y[block_row] <- y_dev                       (after every launch of the row)
//! ```
//!
//! The queue is in-order and `read` drains it, so the y copy-in precedes the
//! row's launches and the copy-out follows them in both queue modes. Block
//! rows run one after another.

use std::time::Instant;

use crate::content::{ContentGenerator, Mismatch, Operand};
use crate::device::{ComputeDevice, DeviceBuffer, DeviceQueue, KernelLaunch, QueueMode, QueueStats};
use crate::error::{MxvError, Result};
use crate::product::{MatrixVectorMultiply, Product};
use crate::storage::{BlockedMatrix, BlockedVector};
use crate::tiling::{BlockCoord, Tiling};

#[derive(Debug, Clone, Copy)]
struct BlockBuffers {
    y: DeviceBuffer,
    a: DeviceBuffer,
    x: DeviceBuffer,
}

/// Host-driven tiled multiply on a [`ComputeDevice`]
#[derive(Debug)]
pub struct StagedOffload<D: ComputeDevice> {
    queue: DeviceQueue<D>,
    verify: bool,
    last_stats: Option<QueueStats>,
}

impl<D: ComputeDevice> StagedOffload<D> {
    /// Pipeline over `device` with the given queue mode
    pub fn new(device: D, mode: QueueMode) -> Self {
        Self {
            queue: DeviceQueue::new(device, mode),
            verify: false,
            last_stats: None,
        }
    }

    /// Check generated operands against the content formulas before computing
    #[must_use]
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// The device work queue
    pub fn queue(&self) -> &DeviceQueue<D> {
        &self.queue
    }

    /// Transfer and launch counters of the most recent successful run
    pub fn last_stats(&self) -> Option<QueueStats> {
        self.last_stats
    }

    /// Multiply host-resident operands, accumulating into `y`
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::InvalidShape`] if the operands were tiled
    /// differently, and any device allocation, transfer or kernel error.
    /// Device buffers are released on every path.
    pub fn multiply_blocks(
        &mut self,
        a: &BlockedMatrix,
        x: &BlockedVector,
        y: &mut BlockedVector,
    ) -> Result<QueueStats> {
        let tiling = *a.tiling();
        if x.tiling() != &tiling || y.tiling() != &tiling {
            return Err(MxvError::shape("A, x and y must share one tiling"));
        }

        self.queue.reset_stats();
        let buffers = self.allocate_buffers(&tiling)?;
        let result = self.run_grid(&tiling, buffers, a, x, y);

        self.queue.discard_pending();
        let device = self.queue.device_mut();
        device.release(buffers.y);
        device.release(buffers.a);
        device.release(buffers.x);

        result?;
        let stats = self.queue.stats();
        self.last_stats = Some(stats);
        Ok(stats)
    }

    fn allocate_buffers(&mut self, tiling: &Tiling) -> Result<BlockBuffers> {
        let device = self.queue.device_mut();
        let bs = tiling.block_size();

        let y = device.allocate(bs)?;
        let a = match device.allocate(tiling.block_elements()) {
            Ok(a) => a,
            Err(e) => {
                device.release(y);
                return Err(e);
            },
        };
        let x = match device.allocate(bs) {
            Ok(x) => x,
            Err(e) => {
                device.release(y);
                device.release(a);
                return Err(e);
            },
        };
        Ok(BlockBuffers { y, a, x })
    }

    fn run_grid(
        &mut self,
        tiling: &Tiling,
        buffers: BlockBuffers,
        a: &BlockedMatrix,
        x: &BlockedVector,
        y: &mut BlockedVector,
    ) -> Result<()> {
        let nbs = tiling.num_blocks();
        let launch = KernelLaunch {
            y: buffers.y,
            a: buffers.a,
            x: buffers.x,
            block_size: tiling.block_size(),
        };

        for block_row in 0..nbs {
            self.queue.enqueue_write(buffers.y, y.block(block_row))?;

            for block_col in 0..nbs {
                let block = BlockCoord::new(block_row, block_col);
                self.queue.enqueue_write(buffers.a, a.block(block))?;
                self.queue.enqueue_write(buffers.x, x.block(block_col))?;
                self.queue.enqueue_launch(launch)?;
            }

            self.queue.read(buffers.y, y.block_mut(block_row))?;
            tracing::debug!(block_row, blocks = nbs, "block row accumulated");
        }
        Ok(())
    }
}

impl<D: ComputeDevice> MatrixVectorMultiply for StagedOffload<D> {
    fn strategy_name(&self) -> &'static str {
        "staged-offload"
    }

    fn multiply(&mut self, content: &ContentGenerator) -> Result<Product> {
        let tiling = *content.tiling();
        let a = BlockedMatrix::generate(content);
        let x = BlockedVector::generate(content, content.x_fill(), content.x_pad());
        let mut y = BlockedVector::zeros(tiling);

        let mut mismatches: Vec<Mismatch> = Vec::new();
        if self.verify {
            mismatches.extend(a.verify(content));
            mismatches.extend(x.verify(content, Operand::X, content.x_fill(), content.x_pad()));
            mismatches.extend(y.verify(content, Operand::Y, 0.0, 0.0));
        }

        let start = Instant::now();
        let stats = self.multiply_blocks(&a, &x, &mut y)?;
        let elapsed = start.elapsed();

        tracing::info!(
            device = %self.queue.device().name(),
            mode = ?self.queue.mode(),
            n = tiling.n(),
            block_size = tiling.block_size(),
            launches = stats.launches,
            bytes_to_device = stats.bytes_to_device,
            bytes_to_host = stats.bytes_to_host,
            elapsed_us = elapsed.as_micros() as u64,
            "staged offload complete"
        );

        Ok(Product {
            y: y.logical().to_vec(),
            elapsed,
            mismatches,
        })
    }
}
