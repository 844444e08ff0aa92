//! Mock device tests for the staged-offload schedule
//!
//! Exercises the offload pipeline against an independent `ComputeDevice`
//! that records every operation, so the transfer order can be checked
//! without trusting the emulated device.

use std::cell::RefCell;
use std::collections::HashMap;

use tiled_mxv::device::{ComputeDevice, DeviceBuffer, KernelLaunch, QueueMode};
use tiled_mxv::kernel::block_multiply;
use tiled_mxv::offload::StagedOffload;
use tiled_mxv::storage::{BlockedMatrix, BlockedVector};
use tiled_mxv::{ContentGenerator, MatrixVectorMultiply, MxvError, Result, Tiling};

#[derive(Debug, Clone, PartialEq)]
enum Op {
    Alloc(usize),
    Write { buffer: usize, first: f64 },
    Launch,
    Read { buffer: usize },
    Release(usize),
}

/// Device that logs operations and can be told to fail the n-th allocation
#[derive(Debug, Default)]
struct RecordingDevice {
    memory: HashMap<usize, Vec<f64>>,
    next_id: usize,
    fail_alloc_at: Option<usize>,
    log: RefCell<Vec<Op>>,
}

impl RecordingDevice {
    fn failing_at(n: usize) -> Self {
        Self {
            fail_alloc_at: Some(n),
            ..Self::default()
        }
    }

    fn log(&self) -> Vec<Op> {
        self.log.borrow().clone()
    }

    fn record(&self, op: Op) {
        self.log.borrow_mut().push(op);
    }

    fn buffer(&self, buffer: DeviceBuffer) -> Result<&Vec<f64>> {
        self.memory.get(&buffer.id()).ok_or(MxvError::Transfer {
            reason: format!("unknown buffer {}", buffer.id()),
        })
    }
}

impl ComputeDevice for RecordingDevice {
    fn name(&self) -> String {
        "recording".to_string()
    }

    fn allocate(&mut self, len: usize) -> Result<DeviceBuffer> {
        if self.fail_alloc_at == Some(self.next_id) {
            return Err(MxvError::DeviceAllocation {
                requested: len * 8,
                available: 0,
            });
        }
        let id = self.next_id;
        self.next_id += 1;
        self.memory.insert(id, vec![0.0; len]);
        self.record(Op::Alloc(len));
        Ok(DeviceBuffer::new(id, len))
    }

    fn release(&mut self, buffer: DeviceBuffer) {
        if self.memory.remove(&buffer.id()).is_some() {
            self.record(Op::Release(buffer.id()));
        }
    }

    fn write(&mut self, dst: DeviceBuffer, src: &[f64]) -> Result<()> {
        let slot = self.memory.get_mut(&dst.id()).ok_or(MxvError::Transfer {
            reason: "unknown buffer".to_string(),
        })?;
        slot.copy_from_slice(src);
        self.record(Op::Write {
            buffer: dst.id(),
            first: src[0],
        });
        Ok(())
    }

    fn read(&self, src: DeviceBuffer, dst: &mut [f64]) -> Result<()> {
        dst.copy_from_slice(self.buffer(src)?);
        self.record(Op::Read { buffer: src.id() });
        Ok(())
    }

    fn launch(&mut self, launch: &KernelLaunch) -> Result<()> {
        let a = self.buffer(launch.a)?.clone();
        let x = self.buffer(launch.x)?.clone();
        let y = self.memory.get_mut(&launch.y.id()).ok_or(MxvError::Transfer {
            reason: "unknown buffer".to_string(),
        })?;
        block_multiply(y, &a, &x, launch.block_size)?;
        self.record(Op::Launch);
        Ok(())
    }

    fn bytes_in_use(&self) -> usize {
        self.memory.values().map(|b| b.len() * 8).sum()
    }
}

fn operands(n: usize, bs: usize) -> (ContentGenerator, BlockedMatrix, BlockedVector, BlockedVector) {
    let content = ContentGenerator::new(Tiling::new(n, bs).expect("test"));
    let a = BlockedMatrix::generate(&content);
    let x = BlockedVector::generate(&content, 1.0, 0.0);
    let y = BlockedVector::zeros(*content.tiling());
    (content, a, x, y)
}

// ============================================================================
// Transfer schedule
// ============================================================================

#[test]
fn test_schedule_per_block_row() {
    let (_, a, x, mut y) = operands(8, 4);
    let mut offload = StagedOffload::new(RecordingDevice::default(), QueueMode::Blocking);
    offload.multiply_blocks(&a, &x, &mut y).expect("test");
    assert_eq!(y.logical(), &[28.0, 92.0, 156.0, 220.0, 284.0, 348.0, 412.0, 476.0]);

    let log = offload.queue().device().log();
    // y, A, x buffers allocated once
    assert_eq!(&log[..3], &[Op::Alloc(4), Op::Alloc(16), Op::Alloc(4)]);

    // Block row 0: y in, then (A, x, launch) per block column, then y out
    assert_eq!(log[3], Op::Write { buffer: 0, first: 0.0 });
    assert_eq!(log[4], Op::Write { buffer: 1, first: 0.0 });
    assert_eq!(log[5], Op::Write { buffer: 2, first: 1.0 });
    assert_eq!(log[6], Op::Launch);
    assert_eq!(log[7], Op::Write { buffer: 1, first: 4.0 });
    assert_eq!(log[9], Op::Launch);
    assert_eq!(log[10], Op::Read { buffer: 0 });

    // Block row 1 starts with its own y copy-in; A block (1,0) starts at 32
    assert_eq!(log[11], Op::Write { buffer: 0, first: 0.0 });
    assert_eq!(log[12], Op::Write { buffer: 1, first: 32.0 });
    assert_eq!(log[18], Op::Read { buffer: 0 });

    let launches = log.iter().filter(|op| **op == Op::Launch).count();
    assert_eq!(launches, 4);
    assert!(log.ends_with(&[Op::Release(0), Op::Release(1), Op::Release(2)]));
}

#[test]
fn test_deferred_queue_produces_same_schedule() {
    let (_, a, x, mut blocking_y) = operands(12, 4);
    let mut deferred_y = blocking_y.clone();

    let mut blocking = StagedOffload::new(RecordingDevice::default(), QueueMode::Blocking);
    blocking.multiply_blocks(&a, &x, &mut blocking_y).expect("test");
    let mut deferred = StagedOffload::new(RecordingDevice::default(), QueueMode::Deferred);
    deferred.multiply_blocks(&a, &x, &mut deferred_y).expect("test");

    assert_eq!(blocking_y, deferred_y);
    assert_eq!(blocking.queue().device().log(), deferred.queue().device().log());
    assert_eq!(deferred.queue().pending(), 0);
}

// ============================================================================
// Failure paths
// ============================================================================

#[test]
fn test_allocation_failure_releases_earlier_buffers() {
    for fail_at in 0..3 {
        let (content, ..) = operands(8, 4);
        let mut offload = StagedOffload::new(RecordingDevice::failing_at(fail_at), QueueMode::Blocking);
        let err = offload.multiply(&content).expect_err("test");
        assert!(matches!(err, MxvError::DeviceAllocation { .. }));
        assert_eq!(offload.queue().device().bytes_in_use(), 0, "fail at {fail_at}");
        assert!(!offload.queue().device().log().contains(&Op::Launch));
    }
}
