//! Error types for the trust store.

use std::io;
use thiserror::Error;

/// Result type for trust operations.
pub type TrustResult<T> = Result<T, TrustError>;

/// Errors that can occur while loading keys or verifying signatures.
#[derive(Debug, Error)]
pub enum TrustError {
    /// Key material could not be parsed.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Description of the problem.
        message: String,
    },

    /// A signature failed verification.
    #[error("invalid signature")]
    InvalidSignature,

    /// No key matched the requested identifier.
    #[error("no key with id {}", hex::encode(.id))]
    KeyNotFound {
        /// The identifier that was searched for.
        id: [u8; 16],
    },

    /// I/O error while reading key files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TrustError {
    /// Creates an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }
}
