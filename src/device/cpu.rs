//! Emulated accelerator with a private memory arena

use std::sync::Arc;

use crate::error::{MxvError, Result};
use crate::kernel::BlockMultiplier;

use super::{ComputeDevice, DeviceBuffer, KernelLaunch};

/// CPU-backed device with memory disjoint from the host's buffers
///
/// Buffers live in slots of a private arena and are only reachable through
/// [`DeviceBuffer`] handles. An optional capacity models a device with
/// limited memory; exceeding it fails allocation.
pub struct CpuDevice {
    multiplier: Arc<dyn BlockMultiplier>,
    capacity: Option<usize>,
    slots: Vec<Option<Vec<f64>>>,
    bytes_in_use: usize,
    launches: usize,
}

impl std::fmt::Debug for CpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuDevice")
            .field("multiplier", &self.multiplier.name())
            .field("capacity", &self.capacity)
            .field("bytes_in_use", &self.bytes_in_use)
            .field("launches", &self.launches)
            .finish_non_exhaustive()
    }
}

impl CpuDevice {
    /// Device with unbounded memory
    #[must_use]
    pub fn new(multiplier: Arc<dyn BlockMultiplier>) -> Self {
        Self {
            multiplier,
            capacity: None,
            slots: Vec::new(),
            bytes_in_use: 0,
            launches: 0,
        }
    }

    /// Device whose memory is limited to `bytes`
    #[must_use]
    pub fn with_capacity(multiplier: Arc<dyn BlockMultiplier>, bytes: usize) -> Self {
        Self {
            capacity: Some(bytes),
            ..Self::new(multiplier)
        }
    }

    /// Memory limit in bytes, if any
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Arena slots ever created, live or free
    #[must_use]
    pub fn arena_slots(&self) -> usize {
        self.slots.len()
    }

    /// Kernels executed so far
    #[must_use]
    pub fn launches(&self) -> usize {
        self.launches
    }

    fn slot(&self, buffer: DeviceBuffer) -> Result<&Vec<f64>> {
        self.slots
            .get(buffer.id())
            .and_then(Option::as_ref)
            .ok_or_else(|| MxvError::Transfer {
                reason: format!("device buffer {} is not allocated", buffer.id()),
            })
    }

    fn slot_mut(&mut self, buffer: DeviceBuffer) -> Result<&mut Vec<f64>> {
        self.slots
            .get_mut(buffer.id())
            .and_then(Option::as_mut)
            .ok_or_else(|| MxvError::Transfer {
                reason: format!("device buffer {} is not allocated", buffer.id()),
            })
    }
}

fn check_extent(buffer: DeviceBuffer, host_len: usize, direction: &str) -> Result<()> {
    if buffer.len() != host_len {
        return Err(MxvError::Transfer {
            reason: format!(
                "{direction} extent mismatch: device buffer {} holds {} elements, host slice {}",
                buffer.id(),
                buffer.len(),
                host_len
            ),
        });
    }
    Ok(())
}

impl ComputeDevice for CpuDevice {
    fn name(&self) -> String {
        format!("cpu-device ({})", self.multiplier.name())
    }

    fn allocate(&mut self, len: usize) -> Result<DeviceBuffer> {
        let requested = len
            .checked_mul(std::mem::size_of::<f64>())
            .ok_or(MxvError::DeviceAllocation {
                requested: usize::MAX,
                available: self.capacity.map_or(usize::MAX, |c| c - self.bytes_in_use),
            })?;

        if let Some(capacity) = self.capacity {
            let available = capacity - self.bytes_in_use;
            if requested > available {
                return Err(MxvError::DeviceAllocation {
                    requested,
                    available,
                });
            }
        }

        // Released slots are reused so the arena does not grow across runs
        let storage = Some(vec![0.0; len]);
        let id = match self.slots.iter().position(Option::is_none) {
            Some(free) => {
                self.slots[free] = storage;
                free
            },
            None => {
                self.slots.push(storage);
                self.slots.len() - 1
            },
        };
        self.bytes_in_use += requested;
        Ok(DeviceBuffer::new(id, len))
    }

    fn release(&mut self, buffer: DeviceBuffer) {
        if let Some(slot) = self.slots.get_mut(buffer.id()) {
            if slot.take().is_some() {
                self.bytes_in_use -= buffer.bytes();
            }
        }
    }

    fn write(&mut self, dst: DeviceBuffer, src: &[f64]) -> Result<()> {
        check_extent(dst, src.len(), "host-to-device")?;
        self.slot_mut(dst)?.copy_from_slice(src);
        Ok(())
    }

    fn read(&self, src: DeviceBuffer, dst: &mut [f64]) -> Result<()> {
        check_extent(src, dst.len(), "device-to-host")?;
        dst.copy_from_slice(self.slot(src)?);
        Ok(())
    }

    fn launch(&mut self, launch: &KernelLaunch) -> Result<()> {
        if launch.y.id() == launch.a.id() || launch.y.id() == launch.x.id() {
            return Err(MxvError::shape(
                "kernel output buffer aliases an input buffer",
            ));
        }

        // Move the accumulator out of the arena so inputs can be borrowed
        let mut y = std::mem::take(self.slot_mut(launch.y)?);
        let result = match (self.slot(launch.a), self.slot(launch.x)) {
            (Ok(a), Ok(x)) => self
                .multiplier
                .multiply_block(&mut y, a, x, launch.block_size),
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        *self.slot_mut(launch.y)? = y;

        result?;
        self.launches += 1;
        Ok(())
    }

    fn bytes_in_use(&self) -> usize {
        self.bytes_in_use
    }
}
