//! Tile ownership across a worker team

use serde::{Deserialize, Serialize};

use crate::error::{MxvError, Result};
use crate::tiling::{BlockCoord, Tiling};

use super::TeamLayout;

/// How matrix tiles map onto the team layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileDistribution {
    /// Tile `(br, bc)` goes to layout coordinate `(br mod rows, bc mod cols)`
    #[default]
    Cyclic,
    /// Contiguous ranges of block rows and block columns per layout coordinate
    Blocked,
}

impl std::str::FromStr for TileDistribution {
    type Err = MxvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cyclic" => Ok(Self::Cyclic),
            "blocked" | "block" => Ok(Self::Blocked),
            other => Err(MxvError::config(format!("unknown tile distribution '{other}'"))),
        }
    }
}

/// Owner of every tile of an NBS×NBS block grid
///
/// Each tile has exactly one owner. Some units may own nothing when the grid
/// is smaller than the layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePattern {
    tiling: Tiling,
    workers: usize,
    owners: Vec<usize>,
}

impl TilePattern {
    /// Pattern derived from a team layout
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::InvalidLayout`] if the layout has a zero factor.
    pub fn new(tiling: Tiling, layout: TeamLayout, distribution: TileDistribution) -> Result<Self> {
        layout.validate_for(layout.size())?;
        let nbs = tiling.num_blocks();
        let row_span = nbs.div_ceil(layout.rows);
        let col_span = nbs.div_ceil(layout.cols);

        let owners = tiling
            .blocks()
            .map(|block| match distribution {
                TileDistribution::Cyclic => {
                    layout.unit_at(block.row % layout.rows, block.col % layout.cols)
                },
                TileDistribution::Blocked => {
                    layout.unit_at(block.row / row_span, block.col / col_span)
                },
            })
            .collect();

        Ok(Self {
            tiling,
            workers: layout.size(),
            owners,
        })
    }

    /// Pattern with an explicit owner per tile, in block-row-major order
    ///
    /// # Errors
    ///
    /// Returns [`MxvError::InvalidConfiguration`] when `owners` does not cover
    /// the grid exactly or names a unit outside the team.
    pub fn from_owners(tiling: Tiling, workers: usize, owners: Vec<usize>) -> Result<Self> {
        if workers == 0 {
            return Err(MxvError::config("tile pattern needs at least one worker"));
        }
        let expected = tiling.num_blocks() * tiling.num_blocks();
        if owners.len() != expected {
            return Err(MxvError::config(format!(
                "owner map has {} entries, block grid has {expected}",
                owners.len()
            )));
        }
        if let Some(bad) = owners.iter().find(|&&owner| owner >= workers) {
            return Err(MxvError::config(format!(
                "owner map names unit {bad}, team has {workers}"
            )));
        }
        Ok(Self {
            tiling,
            workers,
            owners,
        })
    }

    /// Tiling the pattern covers
    #[must_use]
    pub fn tiling(&self) -> &Tiling {
        &self.tiling
    }

    /// Team size the pattern was built for
    #[must_use]
    pub fn team_size(&self) -> usize {
        self.workers
    }

    /// Owning unit of `block`
    #[must_use]
    pub fn owner(&self, block: BlockCoord) -> usize {
        self.owners[self.tiling.block_linear(block)]
    }

    /// Tiles owned by `unit`, block-row major
    #[must_use]
    pub fn local_blocks(&self, unit: usize) -> Vec<BlockCoord> {
        self.tiling
            .blocks()
            .zip(&self.owners)
            .filter(|&(_, &owner)| owner == unit)
            .map(|(block, _)| block)
            .collect()
    }

    /// Number of tiles owned by `unit`
    #[must_use]
    pub fn local_block_count(&self, unit: usize) -> usize {
        self.owners.iter().filter(|&&owner| owner == unit).count()
    }
}
