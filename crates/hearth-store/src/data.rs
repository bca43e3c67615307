use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use hearth_crypto::KeyBag;
use hearth_gateway::Gateway;
use hearth_types::{Block, Cid, StoreType, StoreUrl};

use crate::base::BaseStore;
use crate::error::{StoreError, StoreResult};
use crate::traits::Store;

/// Content-addressed block store.
///
/// Blocks are encrypted with the store's keyed crypto before they reach the
/// gateway. Encryption is deterministic, so saving the same block twice
/// writes identical bytes.
pub struct DataStore {
    base: BaseStore,
}

impl DataStore {
    pub fn new(
        name: impl Into<String>,
        url: StoreUrl,
        gateway: Arc<dyn Gateway>,
        keybag: Arc<dyn KeyBag>,
    ) -> Self {
        Self {
            base: BaseStore::new(name, StoreType::Data, url, gateway, keybag),
        }
    }

    pub fn base(&self) -> &BaseStore {
        &self.base
    }

    async fn block_url(&self, cid: &Cid) -> StoreResult<StoreUrl> {
        let url = self.base.started_url()?;
        Ok(self.base.gateway().build_url(&url, &cid.to_hex()).await?)
    }

    /// Fetch and decrypt a block. Errors, including "not found", propagate.
    pub async fn load(&self, cid: &Cid) -> StoreResult<Block> {
        let url = self.block_url(cid).await?;
        let raw = self.base.gateway().get(&url).await?;
        let bytes = self.base.crypto().await?.decrypt(&raw)?;
        let block = Block::with_cid(*cid, bytes);
        if !block.verify() {
            return Err(StoreError::CorruptBlock(*cid));
        }
        debug!(cid = %cid.short_hex(), len = block.bytes.len(), "loaded block");
        Ok(block)
    }

    /// Encrypt and write a block. Idempotent.
    pub async fn save(&self, block: &Block) -> StoreResult<()> {
        let url = self.block_url(&block.cid).await?;
        let body = self.base.crypto().await?.encrypt(&block.bytes)?;
        self.base.gateway().put(&url, Bytes::from(body)).await?;
        debug!(cid = %block.cid.short_hex(), len = block.bytes.len(), "saved block");
        Ok(())
    }

    pub async fn remove(&self, cid: &Cid) -> StoreResult<()> {
        let url = self.block_url(cid).await?;
        self.base.gateway().delete(&url).await?;
        debug!(cid = %cid.short_hex(), "removed block");
        Ok(())
    }
}

#[async_trait]
impl Store for DataStore {
    fn store_type(&self) -> StoreType {
        StoreType::Data
    }

    fn url(&self) -> StoreUrl {
        self.base.url()
    }

    async fn start(&self) -> StoreResult<StoreUrl> {
        self.base.start().await
    }

    async fn close(&self) -> StoreResult<()> {
        self.base.close().await
    }

    async fn destroy(&self) -> StoreResult<()> {
        self.base.destroy().await
    }
}

impl fmt::Debug for DataStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStore").field("base", &self.base).finish()
    }
}
