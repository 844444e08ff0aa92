//! Deterministic block content
//!
//! Every element of `A` and `x` is a pure function of its global coordinate,
//! so any worker can produce (or re-derive and check) any block without
//! communication:
//!
//! - `A[gy, gx] = gy · N + gx` inside the N×N region, `0` in the padding
//! - `x[g] = fill` inside, `pad` in the padding (defaults 1 and 0)
//!
//! Verification compares observed blocks against the formulas. A mismatch is
//! a correctness defect but not a fatal one: each is logged and collected, and
//! the check carries on so a single run surfaces all of them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tiling::{BlockCoord, LocalCoord, Tiling};

/// Largest integer below which every integer is an `f64`
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Accepted relative error when the product is not integer-valued
const INEXACT_RELATIVE_TOLERANCE: f64 = 1e-12;

/// Which operand a mismatch was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    /// Matrix A
    Matrix,
    /// Input vector x
    X,
    /// Output vector y
    Y,
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Matrix => write!(f, "A"),
            Self::X => write!(f, "x"),
            Self::Y => write!(f, "y"),
        }
    }
}

/// A generated-vs-observed discrepancy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    /// Operand the element belongs to
    pub operand: Operand,
    /// Global row (or vector index)
    pub row: usize,
    /// Global column, for matrix elements
    pub col: Option<usize>,
    /// Value the formula produces
    pub expected: f64,
    /// Value found in storage
    pub observed: f64,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.col {
            Some(col) => write!(
                f,
                "{}[{},{}]: {} != {}",
                self.operand, self.row, col, self.observed, self.expected
            ),
            None => write!(
                f,
                "{}[{}]: {} != {}",
                self.operand, self.row, self.observed, self.expected
            ),
        }
    }
}

impl Mismatch {
    fn report(self) -> Self {
        tracing::warn!(
            operand = %self.operand,
            row = self.row,
            col = ?self.col,
            expected = self.expected,
            observed = self.observed,
            "content mismatch: {}",
            self
        );
        self
    }
}

/// Produces and checks block content from global coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContentGenerator {
    tiling: Tiling,
    x_fill: f64,
    x_pad: f64,
}

impl ContentGenerator {
    /// Generator with the default vector values (`x = 1`, padding `0`)
    #[must_use]
    pub fn new(tiling: Tiling) -> Self {
        Self {
            tiling,
            x_fill: 1.0,
            x_pad: 0.0,
        }
    }

    /// Override the fill and padding values used for `x`
    #[must_use]
    pub fn with_vector_values(mut self, fill: f64, pad: f64) -> Self {
        self.x_fill = fill;
        self.x_pad = pad;
        self
    }

    /// Tiling this generator addresses
    #[must_use]
    pub fn tiling(&self) -> &Tiling {
        &self.tiling
    }

    /// Fill value for in-range `x` elements
    #[must_use]
    pub fn x_fill(&self) -> f64 {
        self.x_fill
    }

    /// Value for padded `x` elements
    #[must_use]
    pub fn x_pad(&self) -> f64 {
        self.x_pad
    }

    /// `A[gy, gx]`
    #[inline]
    #[must_use]
    pub fn matrix_value(&self, gy: usize, gx: usize) -> f64 {
        let n = self.tiling.n();
        if gy < n && gx < n {
            (gy * n + gx) as f64
        } else {
            0.0
        }
    }

    /// `fill` inside the logical vector, `pad` beyond it
    #[inline]
    #[must_use]
    pub fn vector_value(&self, global: usize, fill: f64, pad: f64) -> f64 {
        if global < self.tiling.n() {
            fill
        } else {
            pad
        }
    }

    /// `x[g]` with this generator's fill and padding values
    #[inline]
    #[must_use]
    pub fn x_value(&self, global: usize) -> f64 {
        self.vector_value(global, self.x_fill, self.x_pad)
    }

    /// Closed-form `y[row]` for the generated operands
    ///
    /// `Σ_j (row·N + j)·fill = (row·N² + N(N−1)/2)·fill` for rows inside the
    /// matrix, `0` in the padding. The integer part is computed exactly.
    #[must_use]
    pub fn expected_product(&self, row: usize) -> f64 {
        let n = self.tiling.n();
        if row >= n {
            return 0.0;
        }
        let (n, row) = (n as u128, row as u128);
        (row * n * n + n * (n - 1) / 2) as f64 * self.x_fill
    }

    /// Whether every term and partial sum of the product is an integer that
    /// `f64` holds exactly, so a correct `y` equals the closed form bit for bit
    #[must_use]
    pub fn product_is_exact(&self) -> bool {
        let n = self.tiling.n();
        self.x_fill.fract() == 0.0 && self.expected_product(n - 1).abs() <= MAX_EXACT_INTEGER
    }

    /// Populate a BS×BS matrix block (row-major)
    pub fn fill_matrix_block(&self, block: BlockCoord, out: &mut [f64]) {
        let bs = self.tiling.block_size();
        debug_assert_eq!(out.len(), bs * bs);
        for (local_row, row) in out.chunks_exact_mut(bs).enumerate() {
            for (local_col, value) in row.iter_mut().enumerate() {
                let (gy, gx) = self
                    .tiling
                    .global_coord(block, LocalCoord::new(local_row, local_col));
                *value = self.matrix_value(gy, gx);
            }
        }
    }

    /// Populate a length-BS vector block
    pub fn fill_vector_block(&self, index: usize, fill: f64, pad: f64, out: &mut [f64]) {
        debug_assert_eq!(out.len(), self.tiling.block_size());
        for (local, value) in out.iter_mut().enumerate() {
            *value = self.vector_value(self.tiling.to_global(index, local), fill, pad);
        }
    }

    /// Compare a matrix block with the formula; every mismatch is logged
    #[must_use]
    pub fn verify_matrix_block(&self, block: BlockCoord, observed: &[f64]) -> Vec<Mismatch> {
        let bs = self.tiling.block_size();
        let mut mismatches = Vec::new();
        for (local_row, row) in observed.chunks_exact(bs).enumerate() {
            for (local_col, &value) in row.iter().enumerate() {
                let (gy, gx) = self
                    .tiling
                    .global_coord(block, LocalCoord::new(local_row, local_col));
                let expected = self.matrix_value(gy, gx);
                if value != expected {
                    mismatches.push(
                        Mismatch {
                            operand: Operand::Matrix,
                            row: gy,
                            col: Some(gx),
                            expected,
                            observed: value,
                        }
                        .report(),
                    );
                }
            }
        }
        mismatches
    }

    /// Compare a vector block with `fill`/`pad`; every mismatch is logged
    #[must_use]
    pub fn verify_vector_block(
        &self,
        operand: Operand,
        index: usize,
        fill: f64,
        pad: f64,
        observed: &[f64],
    ) -> Vec<Mismatch> {
        observed
            .iter()
            .enumerate()
            .filter_map(|(local, &value)| {
                let global = self.tiling.to_global(index, local);
                let expected = self.vector_value(global, fill, pad);
                (value != expected).then(|| {
                    Mismatch {
                        operand,
                        row: global,
                        col: None,
                        expected,
                        observed: value,
                    }
                    .report()
                })
            })
            .collect()
    }

    /// Compare a computed `y` (length ≥ N) with [`Self::expected_product`]
    ///
    /// Exact when [`Self::product_is_exact`] holds; otherwise accumulation
    /// order matters and a small relative error is accepted.
    #[must_use]
    pub fn verify_product(&self, y: &[f64]) -> Vec<Mismatch> {
        self.verify_product_within(y, 0.0)
    }

    /// [`Self::verify_product`] allowing an extra relative error, for
    /// multipliers that compute in reduced precision
    #[must_use]
    pub fn verify_product_within(&self, y: &[f64], relative_tolerance: f64) -> Vec<Mismatch> {
        let relative_tolerance = if self.product_is_exact() {
            relative_tolerance
        } else {
            relative_tolerance.max(INEXACT_RELATIVE_TOLERANCE)
        };
        y.iter()
            .enumerate()
            .filter_map(|(row, &value)| {
                let expected = self.expected_product(row);
                let tolerance = relative_tolerance * expected.abs().max(1.0);
                ((value - expected).abs() > tolerance).then(|| {
                    Mismatch {
                        operand: Operand::Y,
                        row,
                        col: None,
                        expected,
                        observed: value,
                    }
                    .report()
                })
            })
            .collect()
    }
}
