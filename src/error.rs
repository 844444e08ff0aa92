//! Error types for tiled matrix-vector multiplication
//!
//! Every failure in this crate is fatal to the run that produced it: there
//! are no retries and no partial-result recovery. Content mismatches found
//! during verification are *not* errors; they are reported as
//! [`crate::content::Mismatch`] values and the run continues.

use thiserror::Error;

/// Result type alias for tiled-mxv operations
pub type Result<T> = std::result::Result<T, MxvError>;

/// Error type for all tiled-mxv operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MxvError {
    /// Rejected invocation parameters (N = 0, BS = 0, W = 0, unsupported backend)
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Why the configuration was rejected
        reason: String,
    },

    /// Worker-layout factors do not multiply to the team size
    #[error("Invalid team layout {rows}x{cols} for {workers} workers")]
    InvalidLayout {
        /// Rows in the requested layout
        rows: usize,
        /// Columns in the requested layout
        cols: usize,
        /// Requested team size
        workers: usize,
    },

    /// Slice or buffer length does not match the declared block extent
    #[error("Invalid shape: {reason}")]
    InvalidShape {
        /// Description of the mismatch
        reason: String,
    },

    /// Device memory could not be allocated
    #[error("Device allocation failed: requested {requested} bytes, {available} available")]
    DeviceAllocation {
        /// Bytes requested
        requested: usize,
        /// Bytes still free on the device
        available: usize,
    },

    /// Host/device copy failed
    #[error("Transfer failed: {reason}")]
    Transfer {
        /// Description of the failed copy
        reason: String,
    },

    /// A distributed structure could not be allocated
    #[error("Distributed allocation failed: {reason}")]
    AllocationFailed {
        /// Description of the failure
        reason: String,
    },

    /// A worker thread terminated abnormally
    #[error("Worker {worker} failed: {reason}")]
    WorkerFailed {
        /// Worker id
        worker: usize,
        /// Panic payload or failure description
        reason: String,
    },

    /// Config file could not be read
    #[error("I/O error: {reason}")]
    Io {
        /// Underlying I/O error message
        reason: String,
    },

    /// Config file could not be parsed
    #[error("Config parse error: {reason}")]
    ConfigParse {
        /// Underlying parser message
        reason: String,
    },
}

impl MxvError {
    /// Shorthand for [`MxvError::InvalidConfiguration`]
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`MxvError::InvalidShape`]
    pub(crate) fn shape(reason: impl Into<String>) -> Self {
        Self::InvalidShape {
            reason: reason.into(),
        }
    }

    /// Whether this error was raised before any compute started
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration { .. } | Self::InvalidLayout { .. } | Self::ConfigParse { .. }
        )
    }
}

impl From<serde_json::Error> for MxvError {
    fn from(err: serde_json::Error) -> Self {
        Self::ConfigParse {
            reason: err.to_string(),
        }
    }
}
