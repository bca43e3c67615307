use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{OnceCell, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use hearth_crypto::KeyBag;
use hearth_gateway::Gateway;
use hearth_store::{BaseStore, Store, StoreResult, DEFAULT_BRANCH};
use hearth_types::{Cid, CommitOpts, DbMeta, FileOp, StoreType, StoreUrl};

use crate::commit_queue::CommitQueue;
use crate::config::WalConfig;
use crate::error::{WalError, WalResult};
use crate::loader::Loadable;
use crate::retry::RetryPolicy;
use crate::state::{QueueHandle, WalQueues, WalState};

/// Queue depths and pass counters of a [`WalStore`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WalStats {
    pub operations: usize,
    pub no_loader_ops: usize,
    pub file_operations: usize,
    /// Drain passes waiting or running.
    pub processing: usize,
    /// Drain passes that found work.
    pub passes: u64,
    /// Passes that ended with an upload or metadata push failure.
    pub failed_passes: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MetaQueue {
    Operations,
    NoLoader,
}

#[derive(Debug, Default)]
struct PassOutcome {
    /// Items retired by the pass, net of re-queued ones.
    progress: usize,
    /// Whether anything is still queued after the pass.
    remaining: bool,
}

/// The write-ahead log store.
///
/// Local commits enter through [`WalStore::enqueue`], which persists the
/// whole WAL document before returning. Drain passes upload the backlog to
/// the loader's remote stores; see the crate docs for the pass algorithm.
pub struct WalStore {
    base: BaseStore,
    loader: Arc<dyn Loadable>,
    config: WalConfig,
    retry: RetryPolicy,
    queues: Mutex<WalQueues>,
    ready: OnceCell<()>,
    commit_queue: CommitQueue,
    persist_lock: tokio::sync::Mutex<()>,
    passes: AtomicU64,
    failed_passes: AtomicU64,
}

impl WalStore {
    pub fn new(
        loader: Arc<dyn Loadable>,
        url: StoreUrl,
        gateway: Arc<dyn Gateway>,
        keybag: Arc<dyn KeyBag>,
        config: WalConfig,
    ) -> Self {
        let base = BaseStore::new(loader.name(), StoreType::Wal, url, gateway, keybag);
        Self {
            base,
            loader,
            retry: config.retry_policy(),
            config,
            queues: Mutex::new(WalQueues::default()),
            ready: OnceCell::new(),
            commit_queue: CommitQueue::new(),
            persist_lock: tokio::sync::Mutex::new(()),
            passes: AtomicU64::new(0),
            failed_passes: AtomicU64::new(0),
        }
    }

    pub fn base(&self) -> &BaseStore {
        &self.base
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    fn queues(&self) -> MutexGuard<'_, WalQueues> {
        self.queues.lock().expect("wal queues lock poisoned")
    }

    /// Load persisted state exactly once.
    ///
    /// Concurrent callers share one load. A missing or unreadable document
    /// yields an empty log.
    pub async fn ready(&self) -> WalResult<()> {
        self.base.started_url()?;
        self.ready
            .get_or_init(|| async {
                let state = match self.load().await {
                    Ok(Some(state)) => state,
                    Ok(None) => WalState::default(),
                    Err(e) => {
                        error!(error = %e, "error loading wal; starting empty");
                        WalState::default()
                    }
                };
                info!(
                    operations = state.operations.len(),
                    no_loader_ops = state.no_loader_ops.len(),
                    file_operations = state.file_operations.len(),
                    "wal ready"
                );
                *self.queues() = WalQueues::from_state(state);
            })
            .await;
        Ok(())
    }

    /// Record a commit and persist the log.
    ///
    /// Returns once the WAL document is durable. Unless `opts.no_loader` is
    /// set, a drain pass is started in the background.
    pub async fn enqueue(self: &Arc<Self>, meta: DbMeta, opts: CommitOpts) -> WalResult<()> {
        self.ready().await?;
        {
            let mut queues = self.queues();
            if opts.compact {
                queues.compact(meta);
            } else if opts.no_loader {
                queues.no_loader_ops.push(meta);
            } else {
                queues.operations.push(meta);
            }
        }
        self.persist().await?;
        debug!(compact = opts.compact, no_loader = opts.no_loader, "enqueued commit");
        if !opts.no_loader {
            self.spawn_process();
        }
        Ok(())
    }

    /// Record an attachment upload. Persisted with the next save.
    pub async fn enqueue_file(&self, cid: Cid, public: bool) -> WalResult<()> {
        self.ready().await?;
        self.queues().file_operations.push(FileOp { cid, public });
        debug!(cid = %cid.short_hex(), public, "enqueued file");
        Ok(())
    }

    fn spawn_process(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.process().await {
                error!(error = %e, "background drain failed");
            }
        });
    }

    /// Drain the log.
    ///
    /// Passes run one at a time. Another pass follows while work remains
    /// and the previous pass made progress; a pass that retires nothing
    /// ends the loop until the next trigger.
    pub async fn process(self: &Arc<Self>) -> WalResult<()> {
        self.ready().await?;
        if self.loader.remote_car_store().is_none() {
            debug!("no remote car store; wal is local-only");
            return Ok(());
        }
        loop {
            let this = Arc::clone(self);
            let outcome = self.commit_queue.enqueue(|| this.do_process()).await?;
            if !outcome.remaining {
                return Ok(());
            }
            if outcome.progress == 0 {
                debug!("drain pass made no progress; waiting for next trigger");
                return Ok(());
            }
            tokio::time::sleep(self.config.drain_pause()).await;
        }
    }

    async fn do_process(self: Arc<Self>) -> WalResult<PassOutcome> {
        let (no_loader, operations, files, epoch) = {
            let queues = self.queues();
            (
                queues.no_loader_ops.snapshot(),
                queues.operations.snapshot(),
                queues.file_operations.snapshot(),
                queues.compactions,
            )
        };
        if no_loader.is_empty() && operations.is_empty() && files.is_empty() {
            return Ok(PassOutcome::default());
        }
        self.passes.fetch_add(1, Ordering::SeqCst);
        info!(
            operations = operations.len(),
            no_loader_ops = no_loader.len(),
            file_operations = files.len(),
            "drain pass started"
        );

        let (progress, result) = self.upload_pass(no_loader, operations, files, epoch).await;
        if let Err(e) = &result {
            self.failed_passes.fetch_add(1, Ordering::SeqCst);
            error!(error = %e, progress, "drain pass failed");
        }

        // Checkpoint whatever the outcome.
        self.persist().await?;
        let remaining = !self.queues().is_empty();
        if result.is_ok() {
            info!(progress, remaining, "drain pass complete");
        }
        Ok(PassOutcome { progress, remaining })
    }

    /// Upload `noLoaderOps`, then `operations`, then files, each phase
    /// bounded by one shared semaphore. A failed phase ends the pass.
    async fn upload_pass(
        self: &Arc<Self>,
        no_loader: Vec<(QueueHandle, DbMeta)>,
        operations: Vec<(QueueHandle, DbMeta)>,
        files: Vec<(QueueHandle, FileOp)>,
        epoch: u64,
    ) -> (usize, WalResult<()>) {
        let limit = Arc::new(Semaphore::new(self.config.concurrency()));
        let mut progress = 0usize;

        let mut tasks = JoinSet::new();
        for (handle, meta) in no_loader {
            tasks.spawn(Arc::clone(self).upload_meta(limit.clone(), MetaQueue::NoLoader, handle, meta));
        }
        if let Err(e) = join_phase("noLoaderOps", tasks, &mut progress).await {
            return (progress, Err(e));
        }

        let mut tasks = JoinSet::new();
        for (handle, meta) in operations.iter().cloned() {
            tasks.spawn(Arc::clone(self).upload_meta(limit.clone(), MetaQueue::Operations, handle, meta));
        }
        if let Err(e) = join_phase("operations", tasks, &mut progress).await {
            return (progress, Err(e));
        }

        let mut tasks = JoinSet::new();
        for (handle, file) in files {
            tasks.spawn(Arc::clone(self).upload_file(limit.clone(), handle, file));
        }
        if let Err(e) = join_phase("fileOperations", tasks, &mut progress).await {
            return (progress, Err(e));
        }

        // Remote metadata only advances once every upload of the pass landed.
        let Some((handle, last)) = operations.last() else {
            return (progress, Ok(()));
        };
        let Some(remote_meta) = self.loader.remote_meta_store() else {
            return (progress, Ok(()));
        };
        let superseded = self.queues().compactions != epoch;
        if superseded {
            info!("compaction during pass; skipping remote meta push");
            return (progress, Ok(()));
        }
        match remote_meta.save(last, DEFAULT_BRANCH).await {
            Ok(cid) => {
                info!(event = %cid.short_hex(), cars = last.cars.len(), "advanced remote meta");
                (progress, Ok(()))
            }
            Err(e) => {
                let requeued = {
                    let mut queues = self.queues();
                    let current = queues.compactions == epoch;
                    if current {
                        queues.operations.restore(*handle, last.clone());
                    }
                    current
                };
                if requeued {
                    error!(error = %e, "error saving remote meta; re-queued last operation");
                    (progress.saturating_sub(1), Err(e.into()))
                } else {
                    warn!(error = %e, "error saving remote meta; operation superseded by compaction");
                    (progress, Err(e.into()))
                }
            }
        }
    }

    async fn upload_meta(
        self: Arc<Self>,
        limit: Arc<Semaphore>,
        queue: MetaQueue,
        handle: QueueHandle,
        meta: DbMeta,
    ) -> WalResult<()> {
        let _permit = limit
            .acquire_owned()
            .await
            .map_err(|e| WalError::Task(e.to_string()))?;
        self.retry.run("car upload", || self.upload_cars(&meta)).await?;
        let mut queues = self.queues();
        match queue {
            MetaQueue::Operations => queues.operations.remove(handle),
            MetaQueue::NoLoader => queues.no_loader_ops.remove(handle),
        };
        Ok(())
    }

    async fn upload_cars(&self, meta: &DbMeta) -> WalResult<()> {
        let Some(remote) = self.loader.remote_car_store() else {
            return Ok(());
        };
        let local = self.loader.car_store();
        for cid in &meta.cars {
            match local.load(cid).await {
                Ok(block) => remote.save(&block).await?,
                Err(e) if e.is_not_found() => {
                    if self.loader.car_log_includes(cid) {
                        return Err(WalError::MissingLocalBlock { cid: *cid });
                    }
                    warn!(cid = %cid.short_hex(), "car no longer in car log; skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }
        debug!(cars = meta.cars.len(), "uploaded cars");
        Ok(())
    }

    async fn upload_file(
        self: Arc<Self>,
        limit: Arc<Semaphore>,
        handle: QueueHandle,
        file: FileOp,
    ) -> WalResult<()> {
        let _permit = limit
            .acquire_owned()
            .await
            .map_err(|e| WalError::Task(e.to_string()))?;
        let local = self.loader.file_store();
        let remote = self
            .loader
            .remote_file_store()
            .or_else(|| self.loader.remote_car_store());
        self.retry
            .run("file upload", || {
                let local = local.clone();
                let remote = remote.clone();
                async move {
                    let block = local.load(&file.cid).await?;
                    if let Some(remote) = remote {
                        remote.save(&block).await?;
                    }
                    Ok(())
                }
            })
            .await?;
        self.queues().file_operations.remove(handle);
        debug!(cid = %file.cid.short_hex(), public = file.public, "uploaded file");
        Ok(())
    }

    /// Persist the current queues. Serialized, and the snapshot is taken
    /// under the lock, so the last write always holds the newest state.
    async fn persist(&self) -> WalResult<()> {
        let _guard = self.persist_lock.lock().await;
        let state = self.queues().to_state();
        self.save(&state).await
    }

    async fn document_url(&self) -> WalResult<StoreUrl> {
        let url = self.base.started_url()?;
        Ok(self.base.gateway().build_url(&url, DEFAULT_BRANCH).await?)
    }

    /// Read the persisted document; `None` if none was ever written.
    pub async fn load(&self) -> WalResult<Option<WalState>> {
        let url = self.document_url().await?;
        let bytes = match self.base.gateway().get(&url).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        WalState::decode(&bytes).map(Some)
    }

    pub async fn save(&self, state: &WalState) -> WalResult<()> {
        let url = self.document_url().await?;
        let body = Bytes::from(state.encode()?);
        self.base.gateway().put(&url, body).await?;
        debug!(
            operations = state.operations.len(),
            no_loader_ops = state.no_loader_ops.len(),
            file_operations = state.file_operations.len(),
            "persisted wal"
        );
        Ok(())
    }

    /// Current in-memory backlog.
    pub fn state(&self) -> WalState {
        self.queues().to_state()
    }

    pub fn stats(&self) -> WalStats {
        let queues = self.queues();
        WalStats {
            operations: queues.operations.len(),
            no_loader_ops: queues.no_loader_ops.len(),
            file_operations: queues.file_operations.len(),
            processing: self.commit_queue.pending(),
            passes: self.passes.load(Ordering::SeqCst),
            failed_passes: self.failed_passes.load(Ordering::SeqCst),
        }
    }
}

/// Wait for every task of one upload phase, adding successes to
/// `progress`. Fails if any task failed.
async fn join_phase(
    phase: &'static str,
    mut tasks: JoinSet<WalResult<()>>,
    progress: &mut usize,
) -> WalResult<()> {
    let total = tasks.len();
    let mut failed = 0usize;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => *progress += 1,
            Ok(Err(e)) => {
                failed += 1;
                warn!(phase, error = %e, "upload left queued");
            }
            Err(e) => {
                failed += 1;
                warn!(phase, error = %WalError::Task(e.to_string()), "upload task aborted");
            }
        }
    }
    if failed > 0 {
        return Err(WalError::UploadFailed { failed, total });
    }
    Ok(())
}

#[async_trait]
impl Store for WalStore {
    fn store_type(&self) -> StoreType {
        StoreType::Wal
    }

    fn url(&self) -> StoreUrl {
        self.base.url()
    }

    async fn start(&self) -> StoreResult<StoreUrl> {
        self.base
            .start_with(|_| async {
                self.ready()
                    .await
                    .map_err(|e| hearth_store::StoreError::Ready(e.to_string()))
            })
            .await
    }

    async fn close(&self) -> StoreResult<()> {
        self.base.close().await
    }

    async fn destroy(&self) -> StoreResult<()> {
        self.base.destroy().await
    }
}

impl fmt::Debug for WalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalStore")
            .field("base", &self.base)
            .field("stats", &self.stats())
            .finish()
    }
}
