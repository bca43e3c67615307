use hearth_gateway::GatewayError;
use hearth_store::StoreError;
use hearth_types::TypeError;
use hearth_wal::WalError;

/// Errors from opening or using a [`Blockstore`](crate::Blockstore).
#[derive(Debug, thiserror::Error)]
pub enum BlockstoreError {
    /// The configuration could not be parsed or serialized.
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Wal(#[from] WalError),

    #[error("blockstore is closed")]
    Closed,
}

impl BlockstoreError {
    /// Returns `true` when a lower layer reported "not found".
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Gateway(e) => e.is_not_found(),
            Self::Store(e) => e.is_not_found(),
            Self::Wal(WalError::Store(e)) => e.is_not_found(),
            Self::Wal(WalError::Gateway(e)) => e.is_not_found(),
            _ => false,
        }
    }
}

/// Result alias for blockstore operations.
pub type BlockstoreResult<T> = Result<T, BlockstoreError>;
