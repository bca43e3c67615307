use thiserror::Error;

/// Errors from key resolution and block encryption.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The store URL names no key and none could be derived.
    #[error("store url has no key reference: {0}")]
    MissingKeyReference(String),

    /// The named key does not exist and creation was not requested.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Ciphertext was produced under a different key.
    #[error("ciphertext key id {found} does not match store key {expected}")]
    UnknownKey { expected: String, found: String },

    #[error("encryption failed")]
    Encrypt,

    /// Authentication tag mismatch or truncated ciphertext.
    #[error("decryption failed")]
    Decrypt,

    /// The IV stored with the ciphertext is not the one derived from the
    /// decrypted plaintext.
    #[error("iv mismatch after decryption")]
    IvMismatch,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
