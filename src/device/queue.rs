//! In-order device work queue

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{MxvError, Result};

use super::{ComputeDevice, DeviceBuffer, KernelLaunch};

/// How submissions are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    /// Every submission runs before `enqueue_*` returns
    #[default]
    Blocking,
    /// Submissions are recorded and run in order at the next synchronization
    Deferred,
}

impl std::str::FromStr for QueueMode {
    type Err = MxvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "blocking" | "sync" => Ok(Self::Blocking),
            "deferred" | "async" => Ok(Self::Deferred),
            other => Err(MxvError::config(format!("unknown queue mode '{other}'"))),
        }
    }
}

/// Counters for everything a queue moved or launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Host-to-device copies
    pub writes: usize,
    /// Device-to-host copies
    pub reads: usize,
    /// Kernel launches
    pub launches: usize,
    /// Bytes copied host-to-device
    pub bytes_to_device: usize,
    /// Bytes copied device-to-host
    pub bytes_to_host: usize,
}

#[derive(Debug)]
enum Command {
    Write { dst: DeviceBuffer, data: Vec<f64> },
    Launch(KernelLaunch),
}

/// In-order queue in front of a [`ComputeDevice`]
///
/// Operations execute in submission order relative to each other. Reads are
/// always synchronous: [`DeviceQueue::read`] drains the queue first, so a
/// copy-out observes every earlier copy-in and launch.
#[derive(Debug)]
pub struct DeviceQueue<D: ComputeDevice> {
    device: D,
    mode: QueueMode,
    pending: VecDeque<Command>,
    stats: QueueStats,
}

impl<D: ComputeDevice> DeviceQueue<D> {
    /// Queue over `device`
    pub fn new(device: D, mode: QueueMode) -> Self {
        Self {
            device,
            mode,
            pending: VecDeque::new(),
            stats: QueueStats::default(),
        }
    }

    /// Execution mode
    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    /// Underlying device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Underlying device, for allocation and release
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Give back the device, discarding unexecuted submissions
    pub fn into_device(self) -> D {
        self.device
    }

    /// Submissions recorded but not yet executed
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Counters so far
    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    /// Reset the counters
    pub fn reset_stats(&mut self) {
        self.stats = QueueStats::default();
    }

    /// Submit a host-to-device copy
    ///
    /// In deferred mode the host data is staged at submission, so `src` may
    /// be reused as soon as this returns.
    ///
    /// # Errors
    ///
    /// Blocking mode: any transfer error. Deferred mode: none until
    /// [`Self::synchronize`].
    pub fn enqueue_write(&mut self, dst: DeviceBuffer, src: &[f64]) -> Result<()> {
        self.stats.writes += 1;
        self.stats.bytes_to_device += std::mem::size_of_val(src);
        match self.mode {
            QueueMode::Blocking => self.device.write(dst, src),
            QueueMode::Deferred => {
                self.pending.push_back(Command::Write {
                    dst,
                    data: src.to_vec(),
                });
                Ok(())
            },
        }
    }

    /// Submit a block-kernel launch
    ///
    /// # Errors
    ///
    /// Blocking mode: any kernel error. Deferred mode: none until
    /// [`Self::synchronize`].
    pub fn enqueue_launch(&mut self, launch: KernelLaunch) -> Result<()> {
        self.stats.launches += 1;
        match self.mode {
            QueueMode::Blocking => self.device.launch(&launch),
            QueueMode::Deferred => {
                self.pending.push_back(Command::Launch(launch));
                Ok(())
            },
        }
    }

    /// Execute every pending submission in order
    ///
    /// # Errors
    ///
    /// Returns the first failing submission's error; later submissions are
    /// discarded.
    pub fn synchronize(&mut self) -> Result<()> {
        while let Some(command) = self.pending.pop_front() {
            let result = match command {
                Command::Write { dst, data } => self.device.write(dst, &data),
                Command::Launch(launch) => self.device.launch(&launch),
            };
            if let Err(e) = result {
                self.pending.clear();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Drop every pending submission without executing it
    pub fn discard_pending(&mut self) {
        self.pending.clear();
    }

    /// Copy a device buffer to host memory after draining the queue
    ///
    /// # Errors
    ///
    /// Returns any error from pending submissions or the copy itself.
    pub fn read(&mut self, src: DeviceBuffer, dst: &mut [f64]) -> Result<()> {
        self.synchronize()?;
        self.stats.reads += 1;
        self.stats.bytes_to_host += std::mem::size_of_val(dst);
        self.device.read(src, dst)
    }
}
