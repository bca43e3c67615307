/// Errors from gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Nothing is stored at the URL.
    #[error("not found: {0}")]
    NotFound(String),

    /// The gateway does not implement the operation (e.g. `subscribe`).
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// No backend is registered for the URL scheme.
    #[error("no gateway registered for scheme {0:?}")]
    UnknownScheme(String),

    /// Fragment framing is inconsistent or the fragment size is unusable.
    #[error("fragment error: {0}")]
    Fragment(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Failure produced by a fault-injecting interceptor.
    #[error("injected fault: {0}")]
    Injected(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl GatewayError {
    /// Returns `true` for the "not found" kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
