use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid store url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unknown store type: {0}")]
    UnknownStoreType(String),
}
