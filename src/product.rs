//! Shared `y = A·x` capability implemented by both execution strategies

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::content::{ContentGenerator, Mismatch};
use crate::error::Result;

/// Outcome of one multiply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Result vector, N elements
    pub y: Vec<f64>,
    /// Wall time of the compute phase (initialization excluded)
    pub elapsed: Duration,
    /// Content mismatches found while verifying the inputs
    pub mismatches: Vec<Mismatch>,
}

impl Product {
    /// Compute-phase time in microseconds
    #[must_use]
    pub fn elapsed_micros(&self) -> u128 {
        self.elapsed.as_micros()
    }

    /// Compare `y` against the closed-form product of the generated operands
    #[must_use]
    pub fn validate(&self, content: &ContentGenerator) -> Vec<Mismatch> {
        content.verify_product(&self.y)
    }
}

/// Capability: compute `y = A·x` for generated operands
///
/// Each strategy materializes `A` and `x` from `content` in its own data
/// placement (host buffers, or worker-local tiles), runs, and returns `y`.
pub trait MatrixVectorMultiply {
    /// Strategy identifier for logs and reports
    fn strategy_name(&self) -> &'static str;

    /// Generate the operands, multiply, and return the product
    ///
    /// # Errors
    ///
    /// Any resource failure is fatal and aborts the run.
    fn multiply(&mut self, content: &ContentGenerator) -> Result<Product>;
}

/// Direct, untiled `A·x` over the first N rows and columns
///
/// The reference every strategy must agree with.
#[must_use]
pub fn direct_product(content: &ContentGenerator) -> Vec<f64> {
    let n = content.tiling().n();
    (0..n)
        .map(|row| {
            (0..n)
                .map(|col| content.matrix_value(row, col) * content.x_value(col))
                .sum()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::Tiling;

    #[test]
    fn test_direct_product_known_vector() {
        let content = ContentGenerator::new(Tiling::new(8, 4).expect("test"));
        assert_eq!(
            direct_product(&content),
            vec![28.0, 92.0, 156.0, 220.0, 284.0, 348.0, 412.0, 476.0]
        );
    }

    #[test]
    fn test_direct_product_padding_case() {
        let content = ContentGenerator::new(Tiling::new(5, 4).expect("test"));
        let y = direct_product(&content);
        assert_eq!(y.len(), 5);
        for (i, &value) in y.iter().enumerate() {
            let expected: usize = (0..5).map(|j| i * 5 + j).sum();
            assert_eq!(value, expected as f64);
        }
    }

    #[test]
    fn test_product_validate_and_micros() {
        let content = ContentGenerator::new(Tiling::new(8, 4).expect("test"));
        let product = Product {
            y: direct_product(&content),
            elapsed: Duration::from_millis(2),
            mismatches: Vec::new(),
        };
        assert!(product.validate(&content).is_empty());
        assert_eq!(product.elapsed_micros(), 2000);
    }
}
