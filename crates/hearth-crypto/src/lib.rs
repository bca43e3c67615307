//! Cryptographic primitives for the Hearth blockstore.
//!
//! - [`ContentHasher`] -- domain-separated BLAKE3 hashing for events and IVs
//! - [`KeyedCrypto`] -- symmetric encryption bound to one store's key
//! - [`KeyBag`] -- resolves store keys by deterministic name

pub mod error;
pub mod hasher;
pub mod keybag;
pub mod keyed;

pub use error::{CryptoError, CryptoResult};
pub use hasher::ContentHasher;
pub use keybag::{KeyBag, MemoryKeyBag, StoreKey, INSECURE_KEY};
pub use keyed::{AesGcmCrypto, InsecureCrypto, KeyedCrypto};
