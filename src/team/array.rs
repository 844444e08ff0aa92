//! Distributed arrays with one-sided element writes
//!
//! Elements are kept as `f64` bit patterns in `AtomicU64` so any worker may
//! write any element by global index without a lock. Accesses are relaxed;
//! the team barrier's lock provides the happens-before edge, so a write is
//! visible to every other worker after the next barrier.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{MxvError, Result};

/// Contiguous per-unit storage of one distributed structure
#[derive(Debug)]
struct Segment {
    cells: Box<[AtomicU64]>,
}

impl Segment {
    fn zeroed(len: usize) -> Self {
        Self {
            cells: (0..len).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn store(&self, offset: usize, value: f64) {
        self.cells[offset].store(value.to_bits(), Ordering::Relaxed);
    }

    fn load(&self, offset: usize) -> f64 {
        f64::from_bits(self.cells[offset].load(Ordering::Relaxed))
    }
}

/// Validate a distributed allocation and return its per-unit block length
fn check_allocation(elements: usize, workers: usize, what: &str) -> Result<usize> {
    if workers == 0 {
        return Err(MxvError::AllocationFailed {
            reason: format!("{what} needs at least one worker"),
        });
    }
    let bytes = elements.checked_mul(std::mem::size_of::<AtomicU64>());
    if bytes.map_or(true, |b| b > isize::MAX as usize) {
        return Err(MxvError::AllocationFailed {
            reason: format!("{what} of {elements} elements exceeds addressable memory"),
        });
    }
    Ok(elements.div_ceil(workers))
}

/// Blocked split of `0..len`: the range held by `unit`
fn unit_range(len: usize, per_unit: usize, unit: usize) -> Range<usize> {
    let start = unit.saturating_mul(per_unit).min(len);
    let end = unit.saturating_add(1).saturating_mul(per_unit).min(len);
    start..end
}

fn out_of_range(what: &str, index: usize, len: usize) -> MxvError {
    MxvError::shape(format!("{what} index {index} out of range for length {len}"))
}

/// Distributed 1-D array with a blocked distribution
///
/// Unit `u` owns the contiguous index range
/// `u·ceil(len/W) .. min((u+1)·ceil(len/W), len)`.
#[derive(Debug)]
pub struct GlobalArray {
    len: usize,
    per_unit: usize,
    segments: Vec<Segment>,
}

impl GlobalArray {
    /// Zero-filled array of `len` elements over `workers` units
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::AllocationFailed`] for an empty team or a size
    /// that overflows.
    pub fn zeroed(len: usize, workers: usize) -> Result<Self> {
        let per_unit = check_allocation(len, workers, "global array")?;
        let segments = (0..workers)
            .map(|unit| Segment::zeroed(unit_range(len, per_unit, unit).len()))
            .collect();
        Ok(Self {
            len,
            per_unit,
            segments,
        })
    }

    /// Global element count
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the array holds no elements
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Unit holding `index`
    #[must_use]
    pub fn owner(&self, index: usize) -> usize {
        debug_assert!(index < self.len);
        index / self.per_unit
    }

    /// Global indices held by `unit`
    #[must_use]
    pub fn local_range(&self, unit: usize) -> Range<usize> {
        unit_range(self.len, self.per_unit, unit)
    }

    /// One-sided write by global index
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::InvalidShape`] for an index past the end.
    pub fn put(&self, index: usize, value: f64) -> Result<()> {
        if index >= self.len {
            return Err(out_of_range("global array", index, self.len));
        }
        self.segments[index / self.per_unit].store(index % self.per_unit, value);
        Ok(())
    }

    /// Read by global index
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::InvalidShape`] for an index past the end.
    pub fn get(&self, index: usize) -> Result<f64> {
        if index >= self.len {
            return Err(out_of_range("global array", index, self.len));
        }
        Ok(self.segments[index / self.per_unit].load(index % self.per_unit))
    }

    /// Full copy into caller-local memory
    #[must_use]
    pub fn copy_to_vec(&self) -> Vec<f64> {
        self.segments
            .iter()
            .flat_map(|segment| segment.cells.iter())
            .map(|cell| f64::from_bits(cell.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Distributed `rows × cols` matrix, row-blocked across the team
///
/// Every unit holds a contiguous range of complete rows, so a row can be
/// reduced across all columns without leaving its owner. Allocation
/// zero-fills, so rows nobody writes read back as 0.
#[derive(Debug)]
pub struct StagingMatrix {
    rows: usize,
    cols: usize,
    rows_per_unit: usize,
    segments: Vec<Segment>,
}

impl StagingMatrix {
    /// Zero-filled matrix over `workers` units
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::AllocationFailed`] for an empty team, zero
    /// columns, or a size that overflows.
    pub fn zeroed(rows: usize, cols: usize, workers: usize) -> Result<Self> {
        if cols == 0 {
            return Err(MxvError::AllocationFailed {
                reason: "staging matrix needs at least one column".to_string(),
            });
        }
        let elements = rows.checked_mul(cols).ok_or_else(|| MxvError::AllocationFailed {
            reason: format!("staging matrix {rows}x{cols} overflows"),
        })?;
        check_allocation(elements, workers, "staging matrix")?;
        let rows_per_unit = rows.div_ceil(workers);
        let segments = (0..workers)
            .map(|unit| Segment::zeroed(unit_range(rows, rows_per_unit, unit).len() * cols))
            .collect();
        Ok(Self {
            rows,
            cols,
            rows_per_unit,
            segments,
        })
    }

    /// Row count
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Column count
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Unit holding `row`
    #[must_use]
    pub fn owner(&self, row: usize) -> usize {
        debug_assert!(row < self.rows);
        row / self.rows_per_unit
    }

    /// Rows held by `unit`
    #[must_use]
    pub fn local_rows(&self, unit: usize) -> Range<usize> {
        unit_range(self.rows, self.rows_per_unit, unit)
    }

    fn locate(&self, row: usize, col: usize) -> Result<(&Segment, usize)> {
        if row >= self.rows || col >= self.cols {
            return Err(MxvError::shape(format!(
                "staging index ({row}, {col}) out of range for {}x{}",
                self.rows, self.cols
            )));
        }
        let segment = &self.segments[row / self.rows_per_unit];
        Ok((segment, (row % self.rows_per_unit) * self.cols + col))
    }

    /// One-sided write at `(row, col)`; placement follows the row distribution
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::InvalidShape`] outside the matrix.
    pub fn put(&self, row: usize, col: usize, value: f64) -> Result<()> {
        let (segment, offset) = self.locate(row, col)?;
        segment.store(offset, value);
        Ok(())
    }

    /// Read at `(row, col)`
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::InvalidShape`] outside the matrix.
    pub fn get(&self, row: usize, col: usize) -> Result<f64> {
        let (segment, offset) = self.locate(row, col)?;
        Ok(segment.load(offset))
    }

    /// Sum of `row` across all columns, read from `unit`'s own segment
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::InvalidShape`] if `unit` does not hold `row`.
    pub fn row_sum_local(&self, unit: usize, row: usize) -> Result<f64> {
        if !self.local_rows(unit).contains(&row) {
            return Err(MxvError::shape(format!("unit {unit} does not hold staging row {row}")));
        }
        let segment = &self.segments[unit];
        let base = (row - unit * self.rows_per_unit) * self.cols;
        Ok((base..base + self.cols).map(|offset| segment.load(offset)).sum())
    }
}
