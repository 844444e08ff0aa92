//! # tiled-mxv
//!
//! Tiled dense matrix-vector multiplication, `y = A·x`, with two execution
//! strategies that share one block kernel.
//!
//! The N×N matrix is split into BS×BS tiles (padded with zeros to
//! NS = ceil(N/BS)·BS). Operands are generated deterministically from their
//! global coordinates, so any participant can produce or check any tile.
//!
//! ## Strategies
//!
//! - **Staged offload** ([`offload::StagedOffload`]): the host owns A, x and
//!   y and streams tiles through a [`device::ComputeDevice`]'s memory, one
//!   kernel launch per tile.
//! - **Distributed tile** ([`distributed::DistributedCombine`]): a
//!   [`team::Team`] of workers each owns a subset of tiles, computes partial
//!   row sums, scatters them into a staging matrix and reduces its own rows.
//!
//! ## Example
//!
//! ```rust
//! use tiled_mxv::{runner, RunConfig};
//!
//! let report = runner::execute(&RunConfig::offload(8, 4).with_verify(true)).unwrap();
//! assert_eq!(report.y, vec![28.0, 92.0, 156.0, 220.0, 284.0, 348.0, 412.0, 476.0]);
//! assert!(report.is_clean());
//! ```
//!
//! ## Kernel variants
//!
//! - `loop`: generic multiply-accumulate, always available
//! - `simd`: trueno SIMD dot products (cargo feature `simd`)

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Clippy allows (MUST come after deny/warn to override them)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)] // usize -> f64 for generated content
#![allow(clippy::cast_possible_truncation)] // u128 micros -> u64
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::float_cmp)] // Exact comparisons on integer-valued floats in tests

/// Command-line front end (argument types and handlers)
#[cfg(feature = "cli")]
pub mod cli;
/// Run configuration and JSON loading
pub mod config;
/// Deterministic operand content and verification
pub mod content;
/// Compute-device backend: buffers, emulated device, work queue
pub mod device;
/// Distributed tile-combine pipeline
pub mod distributed;
pub mod display;
pub mod error;
/// Block multiply-accumulate kernel and its variants
pub mod kernel;
/// Staged-offload pipeline
pub mod offload;
pub mod product;
pub mod runner;
/// Host-side block-major storage
pub mod storage;
/// Distributed-worker runtime
pub mod team;
/// Global/block index mapping
pub mod tiling;

// Re-exports for convenience
pub use config::{RunConfig, StrategyConfig};
pub use content::ContentGenerator;
pub use error::{MxvError, Result};
pub use kernel::{BlockMultiplier, MultiplierKind};
pub use product::{MatrixVectorMultiply, Product};
pub use tiling::Tiling;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
