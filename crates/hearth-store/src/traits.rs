use async_trait::async_trait;

use hearth_types::{Cid, DbMeta, StoreType, StoreUrl};

use crate::error::StoreResult;

/// Lifecycle shared by every store.
#[async_trait]
pub trait Store: Send + Sync {
    fn store_type(&self) -> StoreType;

    /// The store's current URL; complete only after [`Store::start`].
    fn url(&self) -> StoreUrl;

    async fn start(&self) -> StoreResult<StoreUrl>;

    /// Close the gateway and run the close hooks. Stored content survives.
    async fn close(&self) -> StoreResult<()>;

    /// Discard all content stored at the store's URL.
    async fn destroy(&self) -> StoreResult<()>;
}

/// Receives every metadata event a [`MetaStore`](crate::MetaStore) decodes,
/// whether from an explicit load or a push notification.
///
/// Events may be delivered more than once; handlers must be idempotent.
#[async_trait]
pub trait MetaEventHandler: Send + Sync {
    async fn handle_event(&self, cid: &Cid, parents: &[Cid], meta: &DbMeta) -> StoreResult<()>;
}
