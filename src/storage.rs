//! Host-side block storage
//!
//! [`BlockedMatrix`] keeps the padded NS×NS matrix block-major: block
//! `(br, bc)` is a contiguous BS² slice at offset `(br·NBS + bc)·BS²`, row-major
//! inside. A single block can be handed to a copy engine or kernel without
//! gathering strided rows. [`BlockedVector`] is a plain length-NS vector whose
//! block `i` is the range `i·BS .. (i+1)·BS`.

use rayon::prelude::*;

use crate::content::{ContentGenerator, Mismatch, Operand};
use crate::tiling::{BlockCoord, Tiling};

/// Padded N×N matrix stored block-major
#[derive(Debug, Clone, PartialEq)]
pub struct BlockedMatrix {
    tiling: Tiling,
    data: Vec<f64>,
}

impl BlockedMatrix {
    /// All-zero matrix
    #[must_use]
    pub fn zeros(tiling: Tiling) -> Self {
        Self {
            data: vec![0.0; tiling.padded_elements()],
            tiling,
        }
    }

    /// Matrix populated from the content formulas, one rayon task per block
    #[must_use]
    pub fn generate(content: &ContentGenerator) -> Self {
        let mut matrix = Self::zeros(*content.tiling());
        let tiling = matrix.tiling;
        let nbs = tiling.num_blocks();
        matrix
            .data
            .par_chunks_mut(tiling.block_elements())
            .enumerate()
            .for_each(|(linear, block)| {
                content.fill_matrix_block(BlockCoord::new(linear / nbs, linear % nbs), block);
            });
        matrix
    }

    /// Tiling of this matrix
    #[must_use]
    pub fn tiling(&self) -> &Tiling {
        &self.tiling
    }

    /// BS² slice of one block
    #[must_use]
    pub fn block(&self, block: BlockCoord) -> &[f64] {
        let start = self.tiling.matrix_block_offset(block);
        &self.data[start..start + self.tiling.block_elements()]
    }

    /// Mutable BS² slice of one block
    pub fn block_mut(&mut self, block: BlockCoord) -> &mut [f64] {
        let start = self.tiling.matrix_block_offset(block);
        let len = self.tiling.block_elements();
        &mut self.data[start..start + len]
    }

    /// Element at global (row, col) in the padded index space
    #[must_use]
    pub fn get(&self, gy: usize, gx: usize) -> f64 {
        let (block, local) = self.tiling.locate(gy, gx);
        self.block(block)[local.row * self.tiling.block_size() + local.col]
    }

    /// Raw block-major storage
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Check every block against the content formulas
    #[must_use]
    pub fn verify(&self, content: &ContentGenerator) -> Vec<Mismatch> {
        self.tiling
            .blocks()
            .flat_map(|block| content.verify_matrix_block(block, self.block(block)))
            .collect()
    }
}

/// Padded length-NS vector
#[derive(Debug, Clone, PartialEq)]
pub struct BlockedVector {
    tiling: Tiling,
    data: Vec<f64>,
}

impl BlockedVector {
    /// All-zero vector
    #[must_use]
    pub fn zeros(tiling: Tiling) -> Self {
        Self {
            data: vec![0.0; tiling.padded()],
            tiling,
        }
    }

    /// Vector holding `fill` below N and `pad` in the padding
    #[must_use]
    pub fn generate(content: &ContentGenerator, fill: f64, pad: f64) -> Self {
        let mut vector = Self::zeros(*content.tiling());
        let bs = vector.tiling.block_size();
        for (index, block) in vector.data.chunks_exact_mut(bs).enumerate() {
            content.fill_vector_block(index, fill, pad, block);
        }
        vector
    }

    /// Tiling of this vector
    #[must_use]
    pub fn tiling(&self) -> &Tiling {
        &self.tiling
    }

    /// Length-BS slice of one block
    #[must_use]
    pub fn block(&self, index: usize) -> &[f64] {
        &self.data[self.tiling.vector_block_range(index)]
    }

    /// Mutable length-BS slice of one block
    pub fn block_mut(&mut self, index: usize) -> &mut [f64] {
        let range = self.tiling.vector_block_range(index);
        &mut self.data[range]
    }

    /// Element at a global index in the padded space
    #[must_use]
    pub fn get(&self, global: usize) -> f64 {
        self.data[global]
    }

    /// Full padded storage
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// The first N elements
    #[must_use]
    pub fn logical(&self) -> &[f64] {
        &self.data[..self.tiling.n()]
    }

    /// Check every block against `fill`/`pad`
    #[must_use]
    pub fn verify(
        &self,
        content: &ContentGenerator,
        operand: Operand,
        fill: f64,
        pad: f64,
    ) -> Vec<Mismatch> {
        (0..self.tiling.num_blocks())
            .flat_map(|index| content.verify_vector_block(operand, index, fill, pad, self.block(index)))
            .collect()
    }
}
