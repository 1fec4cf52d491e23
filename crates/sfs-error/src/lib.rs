#![forbid(unsafe_code)]
//! Error types for SuccinctFS.
//!
//! Defines `SfsError` and a `Result<T>` alias used throughout the workspace.
//! Includes errno mappings for FUSE response codes.

use thiserror::Error;

/// Unified error type for all SuccinctFS operations.
///
/// Every failure kind is distinguishable; errors surface to the caller
/// unchanged and are translated to errno only at the FUSE boundary.
#[derive(Debug, Error)]
pub enum SfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{op}: index {index} out of range (len {len})")]
    OutOfRange {
        op: &'static str,
        index: u64,
        len: u64,
    },

    #[error("invalid symbol {symbol} (alphabet is 0..=3)")]
    InvalidSymbol { symbol: u8 },

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl SfsError {
    /// Shorthand for the ubiquitous bounds-check failure.
    #[must_use]
    pub fn out_of_range(op: &'static str, index: usize, len: usize) -> Self {
        Self::OutOfRange {
            op,
            index: index as u64,
            len: len as u64,
        }
    }

    /// Convert this error into a POSIX errno suitable for FUSE replies.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::OutOfRange { .. } | Self::InvalidSymbol { .. } => libc::EINVAL,
            Self::InvalidImage(_) | Self::InvariantViolation(_) => libc::EIO,
            Self::NotFound(_) => libc::ENOENT,
        }
    }
}

/// Result alias using `SfsError`.
pub type Result<T> = std::result::Result<T, SfsError>;
