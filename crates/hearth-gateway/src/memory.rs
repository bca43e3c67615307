use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::debug;

use hearth_types::{param, StoreType, StoreUrl, STORAGE_VERSION};

use crate::error::{GatewayError, GatewayResult};
use crate::traits::{Gateway, Subscription};

/// Capacity of each per-store subscription channel.
const SUBSCRIPTION_CAPACITY: usize = 64;

/// In-memory, HashMap-based gateway.
///
/// Intended for tests and embedding. Entries are keyed by the URL's
/// location plus the `name`, `store`, `index`, `key` and `ofs` parameters,
/// so version and key-reference parameters do not change addressing.
/// One instance can serve many stores and many databases at once.
///
/// Writes to a `store=meta` URL are broadcast to that store's subscribers.
pub struct MemoryGateway {
    entries: RwLock<HashMap<String, Bytes>>,
    channels: RwLock<HashMap<String, broadcast::Sender<Bytes>>>,
}

impl MemoryGateway {
    /// Create a new empty gateway.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the gateway is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all entries.
    pub fn total_bytes(&self) -> u64 {
        self.entries
            .read()
            .expect("lock poisoned")
            .values()
            .map(|body| body.len() as u64)
            .sum()
    }

    /// Sorted list of entry keys.
    pub fn keys(&self) -> Vec<String> {
        let map = self.entries.read().expect("lock poisoned");
        let mut keys: Vec<String> = map.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Location plus the parameters identifying one store.
    fn store_prefix(url: &StoreUrl) -> String {
        let mut prefix = format!("{}{}", url.host().unwrap_or_default(), url.path());
        for name in [param::NAME, param::STORE, param::INDEX] {
            if let Some(value) = url.param(name) {
                prefix.push_str(&format!("|{name}={value}"));
            }
        }
        prefix
    }

    fn entry_key(url: &StoreUrl) -> String {
        let mut key = format!("{}#", Self::store_prefix(url));
        if let Some(item) = url.param(param::KEY) {
            key.push_str(&item);
        }
        if let Some(ofs) = url.param(param::OFFSET) {
            key.push_str(&format!("@{ofs}"));
        }
        key
    }

    fn notify(&self, url: &StoreUrl, body: &Bytes) {
        if url.store_type() != Some(StoreType::Meta) || url.has_param(param::OFFSET) {
            return;
        }
        let channels = self.channels.read().expect("lock poisoned");
        if let Some(tx) = channels.get(&Self::store_prefix(url)) {
            // No receivers is fine; the write is already stored.
            let delivered = tx.send(body.clone()).unwrap_or(0);
            debug!(url = %url, delivered, "notified subscribers");
        }
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn start(&self, url: &StoreUrl) -> GatewayResult<StoreUrl> {
        if url.has_param(param::VERSION) {
            return Ok(url.clone());
        }
        Ok(url.with_param(param::VERSION, STORAGE_VERSION))
    }

    async fn build_url(&self, url: &StoreUrl, key: &str) -> GatewayResult<StoreUrl> {
        Ok(url.with_param(param::KEY, key))
    }

    async fn put(&self, url: &StoreUrl, body: Bytes) -> GatewayResult<()> {
        let key = Self::entry_key(url);
        debug!(key = %key, len = body.len(), "memory put");
        self.entries
            .write()
            .expect("lock poisoned")
            .insert(key, body.clone());
        self.notify(url, &body);
        Ok(())
    }

    async fn get(&self, url: &StoreUrl) -> GatewayResult<Bytes> {
        let key = Self::entry_key(url);
        self.entries
            .read()
            .expect("lock poisoned")
            .get(&key)
            .cloned()
            .ok_or(GatewayError::NotFound(key))
    }

    async fn delete(&self, url: &StoreUrl) -> GatewayResult<()> {
        let key = Self::entry_key(url);
        let existed = self
            .entries
            .write()
            .expect("lock poisoned")
            .remove(&key)
            .is_some();
        debug!(key = %key, existed, "memory delete");
        Ok(())
    }

    async fn close(&self, url: &StoreUrl) -> GatewayResult<()> {
        debug!(url = %url, "memory close");
        Ok(())
    }

    async fn destroy(&self, url: &StoreUrl) -> GatewayResult<()> {
        let prefix = format!("{}#", Self::store_prefix(url));
        let mut map = self.entries.write().expect("lock poisoned");
        let before = map.len();
        map.retain(|key, _| !key.starts_with(&prefix));
        debug!(prefix = %prefix, removed = before - map.len(), "memory destroy");
        Ok(())
    }

    fn can_subscribe(&self) -> bool {
        true
    }

    async fn subscribe(&self, url: &StoreUrl) -> GatewayResult<Subscription> {
        let mut channels = self.channels.write().expect("lock poisoned");
        let tx = channels
            .entry(Self::store_prefix(url))
            .or_insert_with(|| broadcast::channel(SUBSCRIPTION_CAPACITY).0);
        Ok(tx.subscribe())
    }
}

impl std::fmt::Debug for MemoryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGateway")
            .field("entry_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_url(store: &str) -> StoreUrl {
        StoreUrl::parse("memory://local")
            .unwrap()
            .with_param(param::NAME, "db")
            .with_param(param::STORE, store)
    }

    async fn item(gw: &MemoryGateway, store: &str, key: &str) -> StoreUrl {
        gw.build_url(&store_url(store), key).await.unwrap()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn start_adds_version() {
        let gw = MemoryGateway::new();
        let url = gw.start(&store_url("data")).await.unwrap();
        assert_eq!(url.param(param::VERSION).as_deref(), Some(STORAGE_VERSION));
    }

    #[tokio::test]
    async fn start_keeps_existing_version() {
        let gw = MemoryGateway::new();
        let input = store_url("data").with_param(param::VERSION, "v0.1");
        assert_eq!(gw.start(&input).await.unwrap(), input);
    }

    // -----------------------------------------------------------------------
    // Core CRUD
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn put_then_get() {
        let gw = MemoryGateway::new();
        let url = item(&gw, "data", "cid1").await;
        gw.put(&url, Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(gw.get(&url).await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(gw.len(), 1);
        assert_eq!(gw.total_bytes(), 5);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let gw = MemoryGateway::new();
        let err = gw.get(&item(&gw, "data", "nope").await).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn version_and_storekey_do_not_change_addressing() {
        let gw = MemoryGateway::new();
        let url = item(&gw, "data", "k").await;
        gw.put(&url, Bytes::from_static(b"x")).await.unwrap();
        let other = url
            .with_param(param::VERSION, "v9")
            .with_param(param::STORE_KEY, "insecure");
        assert!(gw.get(&other).await.is_ok());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let gw = MemoryGateway::new();
        let url = item(&gw, "data", "k").await;
        gw.put(&url, Bytes::from_static(b"x")).await.unwrap();
        gw.delete(&url).await.unwrap();
        gw.delete(&url).await.unwrap();
        assert!(gw.is_empty());
    }

    #[tokio::test]
    async fn destroy_only_removes_one_store() {
        let gw = MemoryGateway::new();
        gw.put(&item(&gw, "data", "a").await, Bytes::from_static(b"1"))
            .await
            .unwrap();
        gw.put(&item(&gw, "data", "b").await, Bytes::from_static(b"2"))
            .await
            .unwrap();
        gw.put(&item(&gw, "meta", "main").await, Bytes::from_static(b"3"))
            .await
            .unwrap();
        gw.destroy(&store_url("data")).await.unwrap();
        assert_eq!(gw.len(), 1);
        assert!(gw.get(&item(&gw, "meta", "main").await).await.is_ok());
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn meta_puts_reach_subscribers() {
        let gw = MemoryGateway::new();
        assert!(gw.can_subscribe());
        let mut rx = gw.subscribe(&store_url("meta")).await.unwrap();
        gw.put(&item(&gw, "meta", "main").await, Bytes::from_static(b"head"))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"head"));
    }

    #[tokio::test]
    async fn data_puts_are_not_broadcast() {
        let gw = MemoryGateway::new();
        let mut rx = gw.subscribe(&store_url("data")).await.unwrap();
        gw.put(&item(&gw, "data", "c").await, Bytes::from_static(b"blk"))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn debug_format() {
        let gw = MemoryGateway::new();
        let debug = format!("{gw:?}");
        assert!(debug.contains("MemoryGateway"));
        assert!(debug.contains("entry_count"));
    }
}
