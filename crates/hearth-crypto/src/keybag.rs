//! Key bag: resolves store keys by deterministic name.
//!
//! Stores never see raw key material. At start they ask the bag to bind a
//! key reference into their URL ([`KeyBag::ensure_key_from_url`]) and later
//! resolve that reference into a [`KeyedCrypto`] ([`KeyBag::keyed_crypto`]).
//!
//! The `storekey` URL parameter drives both steps:
//!
//! - `insecure` -- no encryption
//! - `@name@` -- the named key, created on first use
//! - absent -- `@<derived name>@` is written into the URL

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use rand::RngCore;
use tracing::{debug, info};

use hearth_types::{param, StoreUrl};

use crate::error::{CryptoError, CryptoResult};
use crate::hasher::ContentHasher;
use crate::keyed::{AesGcmCrypto, InsecureCrypto, KeyedCrypto};

/// `storekey` value that disables encryption.
pub const INSECURE_KEY: &str = "insecure";

/// 256-bit symmetric key with its bag name.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreKey {
    name: String,
    bytes: [u8; 32],
}

impl StoreKey {
    pub fn new(name: impl Into<String>, bytes: [u8; 32]) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Generate a fresh random key.
    pub fn generate(name: impl Into<String>) -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(name, bytes)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// First eight bytes of the key's domain-separated hash.
    pub fn key_id(&self) -> [u8; 8] {
        let hash = ContentHasher::KEY.hash(&self.bytes);
        let mut id = [0u8; 8];
        id.copy_from_slice(&hash.as_bytes()[..8]);
        id
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreKey")
            .field("name", &self.name)
            .field("key_id", &hex::encode(self.key_id()))
            .finish()
    }
}

/// Wraps a key name in the `@...@` reference form.
fn key_reference(name: &str) -> String {
    format!("@{name}@")
}

fn is_key_reference(value: &str) -> bool {
    value.len() > 2 && value.starts_with('@') && value.ends_with('@')
}

/// Source of store keys.
#[async_trait]
pub trait KeyBag: Send + Sync {
    /// Fetch the key stored under `name`, creating it when `create` is set.
    async fn named_key(&self, name: &str, create: bool) -> CryptoResult<StoreKey>;

    /// Bind a key reference into `url`.
    ///
    /// `derived_name` is used when the URL carries no `storekey`; it is the
    /// deterministic `name[:index]:storeType` string of the calling store.
    async fn ensure_key_from_url(
        &self,
        url: &StoreUrl,
        derived_name: &str,
    ) -> CryptoResult<StoreUrl> {
        match url.param(param::STORE_KEY) {
            Some(key) if key == INSECURE_KEY => Ok(url.clone()),
            Some(key) if is_key_reference(&key) => {
                self.named_key(&key, true).await?;
                Ok(url.clone())
            }
            Some(_) => Ok(url.clone()),
            None => {
                let reference = key_reference(derived_name);
                self.named_key(&reference, true).await?;
                Ok(url.with_param(param::STORE_KEY, reference))
            }
        }
    }

    /// Resolve the `storekey` reference of a started store's URL.
    async fn keyed_crypto(&self, url: &StoreUrl) -> CryptoResult<Arc<dyn KeyedCrypto>> {
        match url.param(param::STORE_KEY) {
            Some(key) if key == INSECURE_KEY => Ok(Arc::new(InsecureCrypto)),
            Some(key) if is_key_reference(&key) => {
                let key = self.named_key(&key, false).await?;
                Ok(Arc::new(AesGcmCrypto::new(&key)))
            }
            _ => Err(CryptoError::MissingKeyReference(url.to_string())),
        }
    }
}

/// In-memory key bag for tests and embedding.
///
/// Keys live for the lifetime of the bag. Replicas that must read each
/// other's blocks share keys through [`MemoryKeyBag::insert`].
pub struct MemoryKeyBag {
    keys: RwLock<HashMap<String, StoreKey>>,
}

impl MemoryKeyBag {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Import an externally supplied key.
    pub fn insert(&self, key: StoreKey) {
        self.keys
            .write()
            .expect("key bag lock poisoned")
            .insert(key.name().to_string(), key);
    }

    pub fn len(&self) -> usize {
        self.keys.read().expect("key bag lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryKeyBag {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryKeyBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryKeyBag")
            .field("key_count", &self.len())
            .finish()
    }
}

#[async_trait]
impl KeyBag for MemoryKeyBag {
    async fn named_key(&self, name: &str, create: bool) -> CryptoResult<StoreKey> {
        if let Some(key) = self.keys.read().expect("key bag lock poisoned").get(name) {
            return Ok(key.clone());
        }
        if !create {
            return Err(CryptoError::KeyNotFound(name.to_string()));
        }
        let mut keys = self.keys.write().expect("key bag lock poisoned");
        let key = keys
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(name, "generated store key");
                StoreKey::generate(name)
            })
            .clone();
        debug!(name, key_id = %hex::encode(key.key_id()), "resolved store key");
        Ok(key)
    }
}
