//! Two-dimensional arrangement of a worker team

use serde::{Deserialize, Serialize};

use crate::error::{MxvError, Result};

/// `rows × cols` factorization of the team size
///
/// Unit `u` sits at layout coordinate `(u / cols, u % cols)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeamLayout {
    /// Layout rows
    pub rows: usize,
    /// Layout columns
    pub cols: usize,
}

impl TeamLayout {
    /// Layout with explicit factors; checked later by [`Self::validate_for`]
    #[must_use]
    pub const fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    /// Most square factorization of `workers` with `rows >= cols`
    ///
    /// 12 workers become 4×3, a prime count `p` becomes `p×1`.
    #[must_use]
    pub fn balanced(workers: usize) -> Self {
        if workers == 0 {
            return Self::new(0, 0);
        }
        let mut cols = 1;
        let mut d = 1;
        while d * d <= workers {
            if workers % d == 0 {
                cols = d;
            }
            d += 1;
        }
        Self::new(workers / cols, cols)
    }

    /// Units covered by the layout
    #[must_use]
    pub fn size(&self) -> usize {
        self.rows.saturating_mul(self.cols)
    }

    /// Check the layout describes exactly `workers` units
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::InvalidLayout`] for a zero factor or when
    /// `rows · cols != workers`.
    pub fn validate_for(&self, workers: usize) -> Result<()> {
        if self.rows == 0 || self.cols == 0 || self.rows.checked_mul(self.cols) != Some(workers) {
            return Err(MxvError::InvalidLayout {
                rows: self.rows,
                cols: self.cols,
                workers,
            });
        }
        Ok(())
    }

    /// Layout coordinate of `unit`
    #[must_use]
    pub fn coords(&self, unit: usize) -> (usize, usize) {
        debug_assert!(unit < self.size());
        (unit / self.cols, unit % self.cols)
    }

    /// Unit at layout coordinate `(row, col)`
    #[must_use]
    pub fn unit_at(&self, row: usize, col: usize) -> usize {
        debug_assert!(row < self.rows && col < self.cols);
        row * self.cols + col
    }
}

impl std::fmt::Display for TeamLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

impl std::str::FromStr for TeamLayout {
    type Err = MxvError;

    /// Parse `RxC`, e.g. `2x3`
    fn from_str(s: &str) -> Result<Self> {
        let parse = |part: &str| {
            part.trim()
                .parse::<usize>()
                .map_err(|_| MxvError::config(format!("invalid team layout '{s}', expected RxC")))
        };
        let (rows, cols) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| MxvError::config(format!("invalid team layout '{s}', expected RxC")))?;
        Ok(Self::new(parse(rows)?, parse(cols)?))
    }
}
