//! Error types for the container engine.

use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while reading, writing, or transforming
/// containers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The container or one of its blocks is structurally invalid.
    #[error("malformed container: {message}")]
    Malformed {
        /// Description of the problem.
        message: String,
    },

    /// The container's schema tag does not match the expected one.
    #[error("schema mismatch: expected {expected:#010x}, got {actual:#010x}")]
    SchemaMismatch {
        /// The schema tag the caller asked for.
        expected: u32,
        /// The schema tag found in the header.
        actual: u32,
    },

    /// Signatures are required but none verified, or bulk data arrived
    /// before any signature was trusted.
    #[error("no trusted signature")]
    NoKey,

    /// At least one signature was checked and all of them failed.
    #[error("signature verification failed")]
    KeyRejected,

    /// An operation this build or database mode does not handle: an
    /// unknown signature version or hash algorithm, or a write into a
    /// read-only mapped database.
    #[error("not supported: {message}")]
    NotSupported {
        /// Description of the unsupported operation.
        message: String,
    },

    /// A reserved encoding with no write path yet.
    #[error("not implemented: {message}")]
    NotImplemented {
        /// Description of the missing path.
        message: String,
    },

    /// An object or array exceeds a hard size limit.
    #[error("too large: {size} exceeds limit of {limit}")]
    TooLarge {
        /// Observed size.
        size: usize,
        /// The limit that was exceeded.
        limit: usize,
    },

    /// Underlying stream failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Key-store failure.
    #[error("trust error: {0}")]
    Trust(#[from] arkdb_trust::TrustError),
}

impl CoreError {
    /// Creates a malformed container error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Creates a not-supported error.
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::NotSupported {
            message: message.into(),
        }
    }

    /// Creates a not-implemented error.
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented {
            message: message.into(),
        }
    }
}
