//! Compute-device backend for the staged-offload strategy
//!
//! The offload pipeline only talks to a device through [`ComputeDevice`]:
//! allocate device memory, copy an exact extent host→device or device→host,
//! and launch the block kernel over a declared iteration extent. Device memory
//! is disjoint from host memory; the only way data crosses is a copy.
//!
//! ## Architecture
//!
//! ```text
//! +------------------------+
//! |  StagedOffload         |  <- block-grid loop, transfer schedule
//! +------------------------+
//! |  DeviceQueue           |  <- in-order work queue (blocking / deferred)
//! +------------------------+
//! |  ComputeDevice         |  <- CpuDevice, or a real accelerator backend
//! +------------------------+
//! ```
//!
//! [`CpuDevice`] is an emulated accelerator: its memory is a private arena
//! with an optional capacity, and kernels run on the rayon pool through the
//! configured [`crate::kernel::BlockMultiplier`].

mod cpu;
mod queue;

pub use cpu::CpuDevice;
pub use queue::{DeviceQueue, QueueMode, QueueStats};

use crate::error::Result;

/// Handle to a device-resident `f64` buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceBuffer {
    id: usize,
    len: usize,
}

impl DeviceBuffer {
    /// Handle for buffer `id` of `len` elements; minted by device backends
    #[must_use]
    pub const fn new(id: usize, len: usize) -> Self {
        Self { id, len }
    }

    /// Device-side identifier
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Length in elements
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no elements
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size in bytes
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.len * std::mem::size_of::<f64>()
    }
}

/// One block-kernel submission: `y += A · x` over `block_size` row-units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelLaunch {
    /// Accumulator, `block_size` elements
    pub y: DeviceBuffer,
    /// Matrix block, `block_size²` elements
    pub a: DeviceBuffer,
    /// Vector block, `block_size` elements
    pub x: DeviceBuffer,
    /// Block size BS
    pub block_size: usize,
}

impl KernelLaunch {
    /// Number of parallel row-units this launch declares
    #[must_use]
    pub fn extent(&self) -> usize {
        self.block_size
    }
}

/// Abstraction over accelerator backends
///
/// All operations are blocking from the caller's point of view; ordering
/// and deferral are the job of [`DeviceQueue`].
pub trait ComputeDevice: Send {
    /// Human-readable device name
    fn name(&self) -> String;

    /// Allocate a zero-initialized buffer of `len` elements
    ///
    /// # Errors
    ///
    /// Returns [`crate::MxvError::DeviceAllocation`] if device memory is exhausted.
    fn allocate(&mut self, len: usize) -> Result<DeviceBuffer>;

    /// Return a buffer's memory to the device
    fn release(&mut self, buffer: DeviceBuffer);

    /// Copy host data into a device buffer; `src` must match the buffer extent
    ///
    /// # Errors
    ///
    /// Returns [`crate::MxvError::Transfer`] on an unknown buffer or extent mismatch.
    fn write(&mut self, dst: DeviceBuffer, src: &[f64]) -> Result<()>;

    /// Copy a device buffer into host memory; `dst` must match the buffer extent
    ///
    /// # Errors
    ///
    /// Returns [`crate::MxvError::Transfer`] on an unknown buffer or extent mismatch.
    fn read(&self, src: DeviceBuffer, dst: &mut [f64]) -> Result<()>;

    /// Execute the block kernel described by `launch`
    ///
    /// # Errors
    ///
    /// Returns an error if a buffer is unknown or the shapes do not match.
    fn launch(&mut self, launch: &KernelLaunch) -> Result<()>;

    /// Bytes currently allocated on the device
    fn bytes_in_use(&self) -> usize;
}
