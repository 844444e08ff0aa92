//! Block tiling of the N×N index space
//!
//! The matrix and both vectors are partitioned into square blocks of size
//! `BS`. When `N` is not a multiple of `BS` the index space is padded up to
//! `NS = ceil(N / BS) · BS`; padded coordinates carry the value zero.
//!
//! ```text
//!            block_col 0        block_col 1
//!          +-----------------+-----------------+
//! block    | (0,0)  local    | (0,1)           |   gy = block_row · BS + local_row
//! row 0    |  0..BS × 0..BS  |                 |   gx = block_col · BS + local_col
//!          +-----------------+-----------------+
//! block    | (1,0)           | (1,1)      pad  |   gy ≥ N or gx ≥ N  →  padding
//! row 1    |                 |        ░░░░░░░░ |
//!          +-----------------+-----------------+
//! ```
//!
//! A vector block index is interchangeable with a matrix block row (for `y`)
//! or block column (for `x`).

use serde::{Deserialize, Serialize};

use crate::error::{MxvError, Result};

/// Coordinate of a block in the NBS × NBS block grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockCoord {
    /// Block row (indexes `y` blocks)
    pub row: usize,
    /// Block column (indexes `x` blocks)
    pub col: usize,
}

impl BlockCoord {
    /// Create a block coordinate
    #[must_use]
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// Coordinate inside a single block, both components in `[0, BS)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalCoord {
    /// Row within the block
    pub row: usize,
    /// Column within the block
    pub col: usize,
}

impl LocalCoord {
    /// Create a block-local coordinate
    #[must_use]
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// Tiling of an N×N problem into BS×BS blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tiling {
    n: usize,
    block_size: usize,
    num_blocks: usize,
    padded: usize,
}

impl Tiling {
    /// Create a tiling for matrix dimension `n` and block size `block_size`
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::InvalidConfiguration`] if either size is zero or if
    /// the padded matrix (`NS²` elements) does not fit in `usize`.
    pub fn new(n: usize, block_size: usize) -> Result<Self> {
        if n == 0 {
            return Err(MxvError::config("matrix dimension N must be positive"));
        }
        if block_size == 0 {
            return Err(MxvError::config("block size BS must be positive"));
        }

        let num_blocks = n.div_ceil(block_size);
        let padded = num_blocks
            .checked_mul(block_size)
            .and_then(|ns| ns.checked_mul(ns).map(|_| ns))
            .ok_or_else(|| {
                MxvError::config(format!(
                    "padded size for N={n}, BS={block_size} overflows usize"
                ))
            })?;

        Ok(Self {
            n,
            block_size,
            num_blocks,
            padded,
        })
    }

    /// Logical matrix dimension N
    #[must_use]
    pub fn n(&self) -> usize {
        self.n
    }

    /// Block size BS
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks per dimension, NBS = ceil(N / BS)
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    /// Padded dimension NS = NBS · BS
    #[must_use]
    pub fn padded(&self) -> usize {
        self.padded
    }

    /// Elements in the padded matrix, NS²
    #[must_use]
    pub fn padded_elements(&self) -> usize {
        self.padded * self.padded
    }

    /// Elements in one matrix block, BS²
    #[must_use]
    pub fn block_elements(&self) -> usize {
        self.block_size * self.block_size
    }

    /// Whether the tiling needed padding (N is not a multiple of BS)
    #[must_use]
    pub fn is_padded(&self) -> bool {
        self.padded != self.n
    }

    /// Whether a global index lies in the padding region
    #[inline]
    #[must_use]
    pub fn is_padding(&self, global: usize) -> bool {
        global >= self.n
    }

    /// Map (block, local) to a global index along one dimension
    #[inline]
    #[must_use]
    pub fn to_global(&self, block: usize, local: usize) -> usize {
        debug_assert!(block < self.num_blocks, "block {block} out of range");
        debug_assert!(local < self.block_size, "local {local} out of range");
        block * self.block_size + local
    }

    /// Map a global index to its (block, local) pair along one dimension
    #[inline]
    #[must_use]
    pub fn to_block(&self, global: usize) -> (usize, usize) {
        debug_assert!(global < self.padded, "global {global} out of range");
        (global / self.block_size, global % self.block_size)
    }

    /// Global (row, col) of a block-local coordinate
    #[inline]
    #[must_use]
    pub fn global_coord(&self, block: BlockCoord, local: LocalCoord) -> (usize, usize) {
        (
            self.to_global(block.row, local.row),
            self.to_global(block.col, local.col),
        )
    }

    /// Owning block and local offset of a global (row, col)
    #[inline]
    #[must_use]
    pub fn locate(&self, gy: usize, gx: usize) -> (BlockCoord, LocalCoord) {
        let (block_row, local_row) = self.to_block(gy);
        let (block_col, local_col) = self.to_block(gx);
        (
            BlockCoord::new(block_row, block_col),
            LocalCoord::new(local_row, local_col),
        )
    }

    /// Linear index of a block in block-row-major order
    #[inline]
    #[must_use]
    pub fn block_linear(&self, block: BlockCoord) -> usize {
        block.row * self.num_blocks + block.col
    }

    /// Start offset of a block inside block-major matrix storage
    #[inline]
    #[must_use]
    pub fn matrix_block_offset(&self, block: BlockCoord) -> usize {
        self.block_linear(block) * self.block_elements()
    }

    /// Range of a vector block inside a length-NS vector
    #[inline]
    #[must_use]
    pub fn vector_block_range(&self, index: usize) -> std::ops::Range<usize> {
        debug_assert!(index < self.num_blocks);
        let start = index * self.block_size;
        start..start + self.block_size
    }

    /// Iterate every block coordinate, block-row major
    pub fn blocks(&self) -> impl Iterator<Item = BlockCoord> {
        let nbs = self.num_blocks;
        (0..nbs).flat_map(move |row| (0..nbs).map(move |col| BlockCoord::new(row, col)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiling_exact_multiple() {
        let tiling = Tiling::new(8, 4).expect("test");
        assert_eq!(tiling.num_blocks(), 2);
        assert_eq!(tiling.padded(), 8);
        assert!(!tiling.is_padded());
        assert_eq!(tiling.block_elements(), 16);
        assert_eq!(tiling.padded_elements(), 64);
    }

    #[test]
    fn test_tiling_with_padding() {
        let tiling = Tiling::new(5, 4).expect("test");
        assert_eq!(tiling.num_blocks(), 2);
        assert_eq!(tiling.padded(), 8);
        assert!(tiling.is_padded());
        assert!(!tiling.is_padding(4));
        assert!(tiling.is_padding(5));
        assert!(tiling.is_padding(7));
    }

    #[test]
    fn test_tiling_block_larger_than_n() {
        let tiling = Tiling::new(3, 16).expect("test");
        assert_eq!(tiling.num_blocks(), 1);
        assert_eq!(tiling.padded(), 16);
    }

    #[test]
    fn test_tiling_rejects_zero() {
        assert!(Tiling::new(0, 4).is_err());
        assert!(Tiling::new(4, 0).is_err());
        let err = Tiling::new(4, 0).expect_err("test");
        assert!(err.is_configuration());
    }

    #[test]
    fn test_tiling_rejects_overflow() {
        assert!(Tiling::new(usize::MAX, 3).is_err());
        assert!(Tiling::new(1 << 40, 1).is_err());
    }

    #[test]
    fn test_tiling_locate_and_back() {
        let tiling = Tiling::new(10, 4).expect("test");
        let (block, local) = tiling.locate(9, 6);
        assert_eq!(block, BlockCoord::new(2, 1));
        assert_eq!(local, LocalCoord::new(1, 2));
        assert_eq!(tiling.global_coord(block, local), (9, 6));
    }

    #[test]
    fn test_tiling_full_round_trip() {
        let tiling = Tiling::new(7, 3).expect("test");
        for gy in 0..tiling.padded() {
            for gx in 0..tiling.padded() {
                let (block, local) = tiling.locate(gy, gx);
                assert_eq!(tiling.global_coord(block, local), (gy, gx));
            }
        }
    }

    #[test]
    fn test_tiling_offsets() {
        let tiling = Tiling::new(8, 4).expect("test");
        assert_eq!(tiling.matrix_block_offset(BlockCoord::new(0, 0)), 0);
        assert_eq!(tiling.matrix_block_offset(BlockCoord::new(0, 1)), 16);
        assert_eq!(tiling.matrix_block_offset(BlockCoord::new(1, 0)), 32);
        assert_eq!(tiling.vector_block_range(1), 4..8);
    }

    #[test]
    fn test_tiling_blocks_order() {
        let tiling = Tiling::new(5, 4).expect("test");
        let blocks: Vec<_> = tiling.blocks().collect();
        assert_eq!(
            blocks,
            vec![
                BlockCoord::new(0, 0),
                BlockCoord::new(0, 1),
                BlockCoord::new(1, 0),
                BlockCoord::new(1, 1),
            ]
        );
    }
}
