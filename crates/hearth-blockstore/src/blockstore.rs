use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use hearth_store::{DataStore, MetaStore, Store, DEFAULT_BRANCH};
use hearth_types::{Block, Cid, CommitOpts, DbMeta};
use hearth_wal::{WalState, WalStats, WalStore};

use crate::config::{BlockstoreConfig, FILE_INDEX};
use crate::error::{BlockstoreError, BlockstoreResult};
use crate::factory::StoreFactory;
use crate::loader::{BlockstoreLoader, ReceivedMeta, RemoteStores};

/// One database's blockstore: local stores, optional remote, and the WAL
/// between them.
///
/// A commit returns once its blocks, its metadata event and its WAL record
/// are durable locally. Replication happens in the background; its
/// progress is visible through [`Blockstore::wal_stats`].
pub struct Blockstore {
    config: BlockstoreConfig,
    loader: Arc<BlockstoreLoader>,
    meta: MetaStore,
    wal: Arc<WalStore>,
    closed: AtomicBool,
}

impl Blockstore {
    /// Open with one factory for both local and remote stores.
    pub async fn open(config: BlockstoreConfig, factory: &StoreFactory) -> BlockstoreResult<Self> {
        Self::open_with(config, factory, factory).await
    }

    /// Open with separate factories for local and remote stores, for
    /// example to intercept only remote traffic.
    ///
    /// If any store fails to start, the stores already started are closed
    /// before the error is returned.
    pub async fn open_with(
        config: BlockstoreConfig,
        local: &StoreFactory,
        remote: &StoreFactory,
    ) -> BlockstoreResult<Self> {
        let base = config.local_base()?;
        let name = config.name.clone();

        let car = local.data_store(&name, config.store_url(&base, None))?;
        let file = local.data_store(&name, config.store_url(&base, Some(FILE_INDEX)))?;
        let meta = local.meta_store(&name, config.store_url(&base, None))?;
        let locals: [&dyn Store; 3] = [&*car, &*file, &meta];
        if let Err(e) = start_all(&locals).await {
            close_quietly(&locals).await;
            return Err(e);
        }

        let remote_stores = match Self::start_remote(&config, remote).await {
            Ok(stores) => stores,
            Err(e) => {
                close_quietly(&locals).await;
                return Err(e);
            }
        };

        let loader = Arc::new(BlockstoreLoader::new(&name, car.clone(), file.clone(), remote_stores));
        meta.set_handler(loader.clone());
        if let Some(remote) = loader.remote() {
            remote.meta.set_handler(loader.clone());
        }

        let wal = match Self::start_wal(&config, local, loader.clone()).await {
            Ok(wal) => wal,
            Err(e) => {
                close_quietly(&locals).await;
                if let Some(remote) = loader.remote() {
                    let remotes: [&dyn Store; 3] = [&*remote.car, &*remote.file, &remote.meta];
                    close_quietly(&remotes).await;
                }
                return Err(e);
            }
        };

        let backlog = wal.stats();
        info!(
            name = %name,
            remote = loader.remote().is_some(),
            pending = backlog.operations + backlog.no_loader_ops + backlog.file_operations,
            "blockstore opened"
        );
        Ok(Self {
            config,
            loader,
            meta,
            wal,
            closed: AtomicBool::new(false),
        })
    }

    async fn start_wal(
        config: &BlockstoreConfig,
        factory: &StoreFactory,
        loader: Arc<BlockstoreLoader>,
    ) -> BlockstoreResult<Arc<WalStore>> {
        let base = config.local_base()?;
        let wal = factory.wal_store(loader, config.store_url(&base, None), config.wal.clone())?;
        wal.start().await?;
        Ok(wal)
    }

    async fn start_remote(
        config: &BlockstoreConfig,
        factory: &StoreFactory,
    ) -> BlockstoreResult<Option<RemoteStores>> {
        let Some(base) = config.remote_base()? else {
            return Ok(None);
        };
        let stores = RemoteStores {
            car: factory.data_store(&config.name, config.store_url(&base, None))?,
            file: factory.data_store(&config.name, config.store_url(&base, Some(FILE_INDEX)))?,
            meta: factory.meta_store(&config.name, config.store_url(&base, None))?,
        };
        let all: [&dyn Store; 3] = [&*stores.car, &*stores.file, &stores.meta];
        if let Err(e) = start_all(&all).await {
            close_quietly(&all).await;
            return Err(e);
        }
        Ok(Some(stores))
    }

    fn ensure_open(&self) -> BlockstoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BlockstoreError::Closed);
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &BlockstoreConfig {
        &self.config
    }

    pub fn loader(&self) -> &Arc<BlockstoreLoader> {
        &self.loader
    }

    pub fn meta_store(&self) -> &MetaStore {
        &self.meta
    }

    pub fn wal(&self) -> &Arc<WalStore> {
        &self.wal
    }

    fn car_store(&self) -> &Arc<DataStore> {
        self.loader.local_car_store()
    }

    /// Commit a transaction.
    ///
    /// Writes `blocks` to the local car store, records them in the car log,
    /// saves a metadata event locally and enqueues the commit on the WAL.
    /// A compacting commit replaces the car log and removes the cars it
    /// drops from the local store.
    pub async fn commit(
        &self,
        blocks: &[Block],
        payload: Value,
        opts: CommitOpts,
    ) -> BlockstoreResult<DbMeta> {
        self.ensure_open()?;
        for block in blocks {
            self.car_store().save(block).await?;
        }
        let cars: Vec<Cid> = blocks.iter().map(|b| b.cid).collect();
        let dropped = if opts.compact {
            self.loader.compact_cars(&cars)
        } else {
            self.loader.record_cars(&cars);
            Vec::new()
        };

        let meta = DbMeta::new(cars).with_payload(payload);
        let event = self.meta.save(&meta, DEFAULT_BRANCH).await?;
        self.wal.enqueue(meta.clone(), opts).await?;
        debug!(
            event = %event.short_hex(),
            cars = meta.cars.len(),
            compact = opts.compact,
            no_loader = opts.no_loader,
            "committed"
        );

        for cid in dropped {
            if let Err(e) = self.car_store().remove(&cid).await {
                warn!(cid = %cid.short_hex(), error = %e, "error removing compacted car");
            }
        }
        Ok(meta)
    }

    /// Read a car block, falling back to the remote store on a local miss.
    /// Remote hits are cached locally.
    pub async fn get(&self, cid: &Cid) -> BlockstoreResult<Block> {
        self.ensure_open()?;
        let err = match self.car_store().load(cid).await {
            Ok(block) => return Ok(block),
            Err(e) => e,
        };
        let Some(remote) = self.loader.remote().filter(|_| err.is_not_found()) else {
            return Err(err.into());
        };
        let block = remote.car.load(cid).await?;
        self.car_store().save(&block).await?;
        debug!(cid = %cid.short_hex(), "fetched car from remote");
        Ok(block)
    }

    /// Store an attachment locally and queue its upload.
    pub async fn put_file(&self, block: &Block, public: bool) -> BlockstoreResult<()> {
        self.ensure_open()?;
        self.loader.local_file_store().save(block).await?;
        self.wal.enqueue_file(block.cid, public).await?;
        Ok(())
    }

    pub async fn get_file(&self, cid: &Cid) -> BlockstoreResult<Block> {
        self.ensure_open()?;
        Ok(self.loader.local_file_store().load(cid).await?)
    }

    /// Load the local metadata branch.
    pub async fn load_meta(&self, branch: &str) -> BlockstoreResult<Option<Vec<DbMeta>>> {
        self.ensure_open()?;
        Ok(self.meta.load(branch).await?)
    }

    /// Load the remote metadata branch; events reach the loader's handler.
    /// `None` when there is no remote or nothing was pushed yet.
    pub async fn pull(&self) -> BlockstoreResult<Option<Vec<DbMeta>>> {
        self.ensure_open()?;
        match self.loader.remote() {
            Some(remote) => Ok(remote.meta.load(DEFAULT_BRANCH).await?),
            None => Ok(None),
        }
    }

    /// Metadata events received since the last call.
    pub fn take_received(&self) -> Vec<ReceivedMeta> {
        self.loader.take_received()
    }

    /// Run drain passes until the WAL is empty or a pass makes no progress.
    pub async fn flush(&self) -> BlockstoreResult<()> {
        self.ensure_open()?;
        self.wal.process().await?;
        Ok(())
    }

    pub fn wal_stats(&self) -> WalStats {
        self.wal.stats()
    }

    pub fn wal_state(&self) -> WalState {
        self.wal.state()
    }

    /// Close every store. Closing twice is a no-op.
    pub async fn close(&self) -> BlockstoreResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.wal.close().await?;
        self.meta.close().await?;
        self.loader.local_car_store().close().await?;
        self.loader.local_file_store().close().await?;
        if let Some(remote) = self.loader.remote() {
            remote.meta.close().await?;
            remote.car.close().await?;
            remote.file.close().await?;
        }
        info!(name = %self.config.name, "blockstore closed");
        Ok(())
    }

    /// Close, then discard every local store's content.
    pub async fn destroy(&self) -> BlockstoreResult<()> {
        self.close().await?;
        self.wal.destroy().await?;
        self.meta.destroy().await?;
        self.loader.local_car_store().destroy().await?;
        self.loader.local_file_store().destroy().await?;
        info!(name = %self.config.name, "blockstore destroyed");
        Ok(())
    }
}

async fn start_all(stores: &[&dyn Store]) -> BlockstoreResult<()> {
    for store in stores {
        store.start().await?;
    }
    Ok(())
}

/// Close every store, logging failures.
async fn close_quietly(stores: &[&dyn Store]) {
    for store in stores {
        if let Err(e) = store.close().await {
            debug!(store = %store.store_type(), error = %e, "close after failed open");
        }
    }
}

impl fmt::Debug for Blockstore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blockstore")
            .field("name", &self.config.name)
            .field("remote", &self.config.remote_url)
            .field("wal", &self.wal.stats())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
