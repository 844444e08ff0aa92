//! Block multiply-accumulate kernel
//!
//! The single unit of parallel work in both pipelines:
//!
//! ```text
//! y_block[r] += Σ_{c=0}^{BS-1} A_block[r·BS + c] · x_block[c]      for r in 0..BS
//! ```
//!
//! Rows have no data dependency on each other, so a block can be executed
//! either as BS independent row-units (data-parallel, one rayon task per row
//! chunk) or as one sequential unit per block (block-parallel, when the caller
//! already runs blocks on separate workers). Within a row, columns are
//! accumulated sequentially.
//!
//! ## Variants
//!
//! | Multiplier | Row dot product | Precision | Availability |
//! |------------|-----------------|-----------|--------------|
//! | [`LoopMultiplier`] | scalar loop | f64 | always |
//! | [`SimdMultiplier`] | `trueno::Vector::dot` (AVX2/NEON/scalar) | f32 accumulate | feature `simd` |

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{MxvError, Result};

/// Block size at which rows are dispatched to the rayon pool
///
/// Below this the per-task overhead outweighs the row work.
pub const PARALLEL_ROW_THRESHOLD: usize = 64;

/// Rows handed to one rayon task in the parallel path
const ROW_CHUNK: usize = 16;

/// Capability: multiply a BS×BS block into a length-BS accumulator
///
/// Implementors provide the row dot product; the block loop, argument
/// validation and row dispatch are shared.
pub trait BlockMultiplier: Send + Sync {
    /// Short identifier for logs and reports
    fn name(&self) -> &'static str;

    /// Dot product of one matrix row with the vector block
    fn row_dot(&self, a_row: &[f64], x_block: &[f64]) -> f64;

    /// Relative error this multiplier may introduce on an exactly
    /// representable product; `0.0` for full-precision multipliers
    fn relative_tolerance(&self) -> f64 {
        0.0
    }

    /// `y_block[r] += Σ_c a_block[r·bs + c] · x_block[c]` for every row
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::InvalidShape`] if `bs == 0`, `y_block` or `x_block`
    /// is not `bs` long, or `a_block` is not `bs²` long.
    fn multiply_block(
        &self,
        y_block: &mut [f64],
        a_block: &[f64],
        x_block: &[f64],
        bs: usize,
    ) -> Result<()> {
        check_block_shapes(y_block, a_block, x_block, bs)?;

        if bs < PARALLEL_ROW_THRESHOLD {
            for (y, a_row) in y_block.iter_mut().zip(a_block.chunks_exact(bs)) {
                *y += self.row_dot(a_row, x_block);
            }
        } else {
            // Each task owns a disjoint chunk of output rows
            y_block
                .par_chunks_mut(ROW_CHUNK)
                .zip(a_block.par_chunks(ROW_CHUNK * bs))
                .for_each(|(y_chunk, a_chunk)| {
                    for (y, a_row) in y_chunk.iter_mut().zip(a_chunk.chunks_exact(bs)) {
                        *y += self.row_dot(a_row, x_block);
                    }
                });
        }
        Ok(())
    }
}

fn check_block_shapes(y_block: &[f64], a_block: &[f64], x_block: &[f64], bs: usize) -> Result<()> {
    if bs == 0 {
        return Err(MxvError::shape("block size must be positive"));
    }
    if y_block.len() != bs {
        return Err(MxvError::shape(format!(
            "y block has {} elements, expected {bs}",
            y_block.len()
        )));
    }
    if x_block.len() != bs {
        return Err(MxvError::shape(format!(
            "x block has {} elements, expected {bs}",
            x_block.len()
        )));
    }
    if a_block.len() != bs * bs {
        return Err(MxvError::shape(format!(
            "A block has {} elements, expected {}",
            a_block.len(),
            bs * bs
        )));
    }
    Ok(())
}

/// Generic scalar-loop multiplier
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopMultiplier;

impl BlockMultiplier for LoopMultiplier {
    fn name(&self) -> &'static str {
        "loop"
    }

    #[inline]
    fn row_dot(&self, a_row: &[f64], x_block: &[f64]) -> f64 {
        let mut sum = 0.0f64;
        for (a, x) in a_row.iter().zip(x_block) {
            sum += a * x;
        }
        sum
    }
}

/// SIMD multiplier backed by trueno's vectorized dot product
///
/// trueno vectors are single precision, so rows are narrowed to `f32` and
/// the dot product is widened back.
#[cfg(feature = "simd")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SimdMultiplier;

#[cfg(feature = "simd")]
impl BlockMultiplier for SimdMultiplier {
    fn name(&self) -> &'static str {
        "simd"
    }

    #[inline]
    fn row_dot(&self, a_row: &[f64], x_block: &[f64]) -> f64 {
        let a: Vec<f32> = a_row.iter().map(|&v| v as f32).collect();
        let x: Vec<f32> = x_block.iter().map(|&v| v as f32).collect();
        trueno::Vector::from_slice(&a)
            .dot(&trueno::Vector::from_slice(&x))
            .map_or_else(|_| LoopMultiplier.row_dot(a_row, x_block), f64::from)
    }

    fn relative_tolerance(&self) -> f64 {
        SIMD_RELATIVE_TOLERANCE
    }
}

/// Error bound of [`SimdMultiplier`] relative to the exact product
#[cfg(feature = "simd")]
pub const SIMD_RELATIVE_TOLERANCE: f64 = 1e-4;

/// Multiplier selection, resolved once at configuration time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiplierKind {
    /// [`LoopMultiplier`]
    #[default]
    Loop,
    /// [`SimdMultiplier`] (requires feature `simd`)
    Simd,
}

impl MultiplierKind {
    /// Instantiate the selected multiplier
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::InvalidConfiguration`] when `Simd` is requested but
    /// the crate was built without the `simd` feature.
    pub fn build(self) -> Result<Arc<dyn BlockMultiplier>> {
        match self {
            Self::Loop => Ok(Arc::new(LoopMultiplier)),
            #[cfg(feature = "simd")]
            Self::Simd => Ok(Arc::new(SimdMultiplier)),
            #[cfg(not(feature = "simd"))]
            Self::Simd => Err(MxvError::config(
                "simd multiplier requested but the `simd` feature is not enabled",
            )),
        }
    }

    /// Whether this multiplier can be built in the current binary
    #[must_use]
    pub fn is_available(self) -> bool {
        match self {
            Self::Loop => true,
            Self::Simd => cfg!(feature = "simd"),
        }
    }
}

impl std::fmt::Display for MultiplierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loop => write!(f, "loop"),
            Self::Simd => write!(f, "simd"),
        }
    }
}

impl std::str::FromStr for MultiplierKind {
    type Err = MxvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "loop" | "generic" => Ok(Self::Loop),
            "simd" | "vendor" => Ok(Self::Simd),
            other => Err(MxvError::config(format!("unknown multiplier '{other}'"))),
        }
    }
}

/// Multiply-accumulate one block with the generic loop multiplier
///
/// # Errors
///
/// See [`BlockMultiplier::multiply_block`].
pub fn block_multiply(y_block: &mut [f64], a_block: &[f64], x_block: &[f64], bs: usize) -> Result<()> {
    LoopMultiplier.multiply_block(y_block, a_block, x_block, bs)
}
