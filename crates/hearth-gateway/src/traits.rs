use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use hearth_types::StoreUrl;

use crate::error::{GatewayError, GatewayResult};

/// Push-notification stream returned by [`Gateway::subscribe`].
///
/// Each message is the raw body of a write made by some other writer.
/// Dropping the receiver unsubscribes.
pub type Subscription = broadcast::Receiver<Bytes>;

/// URL-addressed byte store underneath every Hearth store.
///
/// All implementations must satisfy these invariants:
/// - `get` on a missing entry returns [`GatewayError::NotFound`].
/// - `put` replaces whatever was stored at the URL.
/// - `delete` of a missing entry is not an error unless the backend
///   documents otherwise.
/// - The gateway never interprets payloads.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Prepare the backend for the store at `url` and return the URL the
    /// store should use from now on (backends may add parameters such as
    /// `version`).
    async fn start(&self, url: &StoreUrl) -> GatewayResult<StoreUrl>;

    /// Address of the item `key` (a branch name or CID) within the store.
    async fn build_url(&self, url: &StoreUrl, key: &str) -> GatewayResult<StoreUrl>;

    async fn put(&self, url: &StoreUrl, body: Bytes) -> GatewayResult<()>;

    async fn get(&self, url: &StoreUrl) -> GatewayResult<Bytes>;

    async fn delete(&self, url: &StoreUrl) -> GatewayResult<()>;

    /// Release resources held for the store. Stored content survives.
    async fn close(&self, url: &StoreUrl) -> GatewayResult<()>;

    /// Discard everything stored for the store.
    async fn destroy(&self, url: &StoreUrl) -> GatewayResult<()>;

    /// Whether [`Gateway::subscribe`] is implemented.
    fn can_subscribe(&self) -> bool {
        false
    }

    /// Receive the bodies of metadata writes made to the store at `url`.
    async fn subscribe(&self, url: &StoreUrl) -> GatewayResult<Subscription> {
        Err(GatewayError::Unsupported(format!("subscribe on {url}")))
    }
}
