use hearth_clock::ClockError;
use hearth_crypto::CryptoError;
use hearth_gateway::GatewayError;
use hearth_types::Cid;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Key binding or block encryption failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A metadata document could not be encoded or decoded.
    #[error(transparent)]
    Clock(#[from] ClockError),

    /// The started URL carries no `version` parameter.
    #[error("missing version: {0}")]
    MissingVersion(String),

    #[error("store already started: {0}")]
    AlreadyStarted(String),

    /// I/O was attempted before `start` completed.
    #[error("store not started: {0}")]
    NotStarted(String),

    /// Loaded bytes do not hash to the requested CID.
    #[error("corrupt block {0}")]
    CorruptBlock(Cid),

    /// A store-specific ready hook failed.
    #[error("ready hook failed: {0}")]
    Ready(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Returns `true` when the underlying gateway reported "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Gateway(e) if e.is_not_found())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
