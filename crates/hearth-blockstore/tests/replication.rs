//! End-to-end replication scenarios over in-memory gateways.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;

use hearth_blockstore::{Blockstore, BlockstoreConfig, BlockstoreError, StoreFactory};
use hearth_crypto::MemoryKeyBag;
use hearth_gateway::{
    FaultInjector, Gateway, GatewayError, GatewayInterceptor, GatewayRegistry, Intercept,
    MemoryGateway,
};
use hearth_store::DEFAULT_BRANCH;
use hearth_types::{param, Block, Cid, CommitOpts, StoreType, StoreUrl};
use hearth_wal::WalConfig;

/// Independent fault injection for remote block and metadata writes, plus
/// one block that can be made to fail on its own.
struct RemoteFaults {
    data: FaultInjector,
    meta: FaultInjector,
    failing_block: Mutex<Option<Cid>>,
}

impl RemoteFaults {
    fn new() -> Self {
        Self {
            data: FaultInjector::only(StoreType::Data),
            meta: FaultInjector::only(StoreType::Meta),
            failing_block: Mutex::new(None),
        }
    }

    fn fail_block(&self, cid: Option<Cid>) {
        *self.failing_block.lock().unwrap() = cid;
    }

    fn fails(&self, url: &StoreUrl) -> bool {
        let failing = self.failing_block.lock().unwrap();
        match (*failing, url.param(param::KEY)) {
            (Some(cid), Some(key)) => url.store_type() == Some(StoreType::Data) && key == cid.to_hex(),
            _ => false,
        }
    }
}

#[async_trait]
impl GatewayInterceptor for RemoteFaults {
    async fn put(&self, url: &StoreUrl, body: Bytes) -> Intercept<(StoreUrl, Bytes), ()> {
        if self.fails(url) {
            return Intercept::Stop(Err(GatewayError::Injected(format!("put {url}"))));
        }
        match self.data.put(url, body).await {
            Intercept::Continue((url, body)) => self.meta.put(&url, body).await,
            stop => stop,
        }
    }
}

/// Fails gateway starts of one store type and counts closes.
#[derive(Default)]
struct Lifecycle {
    fail_start: Option<StoreType>,
    closes: AtomicUsize,
}

#[async_trait]
impl GatewayInterceptor for Lifecycle {
    async fn start(&self, url: &StoreUrl) -> Intercept<StoreUrl, StoreUrl> {
        if self.fail_start.is_some() && url.store_type() == self.fail_start {
            return Intercept::Stop(Err(GatewayError::Injected(format!("start {url}"))));
        }
        Intercept::Continue(url.clone())
    }

    async fn close(&self, url: &StoreUrl) -> Intercept<StoreUrl, ()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Intercept::Continue(url.clone())
    }
}

struct Env {
    local: StoreFactory,
    remote: StoreFactory,
    faults: Arc<RemoteFaults>,
    memory: Arc<MemoryGateway>,
}

impl Env {
    fn new() -> Self {
        let memory = Arc::new(MemoryGateway::new());
        let registry = Arc::new(GatewayRegistry::with_memory(memory.clone()));
        let keybag = Arc::new(MemoryKeyBag::new());
        let faults = Arc::new(RemoteFaults::new());
        let local = StoreFactory::new(registry.clone(), keybag.clone());
        let remote = StoreFactory::new(registry, keybag).with_interceptor(faults.clone());
        Self {
            local,
            remote,
            faults,
            memory,
        }
    }

    fn config(&self, local_host: &str) -> BlockstoreConfig {
        let mut config = BlockstoreConfig::new("todos").with_remote("memory://cloud");
        config.local_url = format!("memory://{local_host}");
        config.wal = WalConfig {
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter: 0.0,
            drain_pause_ms: 1,
            ..WalConfig::default()
        };
        config
    }

    async fn open(&self, local_host: &str) -> Blockstore {
        Blockstore::open_with(self.config(local_host), &self.local, &self.remote)
            .await
            .unwrap()
    }
}

fn block(text: &str) -> Block {
    Block::new(text.as_bytes().to_vec())
}

/// Wait until at least `passes` drain passes ran and none is queued.
async fn settle(store: &Blockstore, passes: u64) {
    for _ in 0..500 {
        let stats = store.wal_stats();
        if stats.passes >= passes && stats.processing == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("wal did not settle: {:?}", store.wal_stats());
}

// ---------------------------------------------------------------------------
// Replication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn commit_replicates_blocks_then_meta() {
    let env = Env::new();
    let store = env.open("local").await;
    let a = block("doc A");

    let meta = store
        .commit(&[a.clone()], json!({"clock": 1}), CommitOpts::default())
        .await
        .unwrap();
    store.flush().await.unwrap();

    assert_eq!(store.wal_stats().operations, 0);
    assert_eq!(env.faults.meta.put_calls(), 1);
    assert_eq!(store.pull().await.unwrap(), Some(vec![meta]));
    let remote = store.loader().remote().unwrap();
    assert_eq!(remote.car.load(&a.cid).await.unwrap(), a);
}

#[tokio::test]
async fn failing_remote_gets_five_attempts_per_pass() {
    let env = Env::new();
    let store = env.open("local").await;
    env.faults.data.fail_all_puts();

    store
        .commit(&[block("doc A")], json!({}), CommitOpts::default())
        .await
        .unwrap();
    settle(&store, 1).await;

    assert_eq!(env.faults.data.put_calls(), 5);
    assert_eq!(store.wal_stats().operations, 1);
    assert_eq!(store.wal_stats().failed_passes, 1);
}

#[tokio::test]
async fn meta_never_advances_before_blocks_land() {
    let env = Env::new();
    let store = env.open("local").await;
    env.faults.data.fail_all_puts();

    store
        .commit(&[block("doc A")], json!({}), CommitOpts::default())
        .await
        .unwrap();
    settle(&store, 1).await;

    assert_eq!(env.faults.meta.put_calls(), 0);
    assert_eq!(store.pull().await.unwrap(), None);
}

#[tokio::test]
async fn crash_mid_drain_recovers_on_reopen() {
    let env = Env::new();
    let first = env.open("local").await;
    env.faults.data.fail_all_puts();
    let a = block("doc A");
    let meta = first
        .commit(&[a.clone()], json!({"clock": 1}), CommitOpts::default())
        .await
        .unwrap();
    settle(&first, 1).await;
    // Abandon without closing.
    drop(first);

    env.faults.data.heal();
    let second = env.open("local").await;
    assert_eq!(second.wal_state().operations, vec![meta.clone()]);

    second.flush().await.unwrap();
    assert_eq!(second.wal_stats().operations, 0);
    assert_eq!(second.pull().await.unwrap(), Some(vec![meta]));

    // The drained state is what a third open sees.
    let third = env.open("local").await;
    assert!(third.wal_state().is_empty());
}

#[tokio::test]
async fn partly_drained_pass_survives_reopen() {
    let env = Env::new();
    let first = env.open("local").await;
    let blocks = [block("doc A"), block("doc B"), block("doc C")];

    // Queue all three while the remote is down, so one pass sees them all.
    env.faults.data.fail_all_puts();
    let mut metas = Vec::new();
    for b in &blocks {
        let meta = first
            .commit(&[b.clone()], json!({}), CommitOpts::default())
            .await
            .unwrap();
        metas.push(meta);
    }
    first.flush().await.unwrap();
    settle(&first, 1).await;
    assert_eq!(first.wal_stats().operations, 3);

    env.faults.fail_block(Some(blocks[1].cid));
    env.faults.data.heal();
    first.flush().await.unwrap();
    settle(&first, 1).await;
    assert_eq!(first.wal_state().operations, vec![metas[1].clone()]);
    drop(first);

    let second = env.open("local").await;
    assert_eq!(second.wal_state().operations, vec![metas[1].clone()]);
    assert_eq!(env.faults.meta.put_calls(), 0);
    assert_eq!(second.pull().await.unwrap(), None);
    let remote = second.loader().remote().unwrap();
    assert_eq!(remote.car.load(&blocks[0].cid).await.unwrap(), blocks[0]);
    assert_eq!(remote.car.load(&blocks[2].cid).await.unwrap(), blocks[2]);
    assert!(remote.car.load(&blocks[1].cid).await.is_err());
}

#[tokio::test]
async fn meta_push_failure_is_retried_next_pass() {
    let env = Env::new();
    let store = env.open("local").await;
    env.faults.meta.fail_puts(1);

    let meta = store
        .commit(&[block("doc A")], json!({}), CommitOpts::default())
        .await
        .unwrap();
    settle(&store, 1).await;
    assert_eq!(store.wal_stats().operations, 1);

    store.flush().await.unwrap();
    assert_eq!(store.wal_stats().operations, 0);
    assert_eq!(store.pull().await.unwrap(), Some(vec![meta]));
}

#[tokio::test]
async fn files_replicate_without_meta_push() {
    let env = Env::new();
    let store = env.open("local").await;
    let file = block("attachment bytes");

    store.put_file(&file, false).await.unwrap();
    assert_eq!(store.get_file(&file.cid).await.unwrap(), file);
    store.flush().await.unwrap();

    assert_eq!(store.wal_stats().file_operations, 0);
    assert_eq!(env.faults.meta.put_calls(), 0);
    let remote = store.loader().remote().unwrap();
    assert_eq!(remote.file.load(&file.cid).await.unwrap(), file);
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_branch_is_absent() {
    let env = Env::new();
    let store = env.open("local").await;
    assert_eq!(store.load_meta(DEFAULT_BRANCH).await.unwrap(), None);
    assert_eq!(store.pull().await.unwrap(), None);
}

#[tokio::test]
async fn consecutive_commits_leave_one_head() {
    let env = Env::new();
    let store = env.open("local").await;
    store
        .commit(&[block("one")], json!({"clock": 1}), CommitOpts::no_loader())
        .await
        .unwrap();
    let first_heads = store.meta_store().heads();
    let second = store
        .commit(&[block("two")], json!({"clock": 2}), CommitOpts::no_loader())
        .await
        .unwrap();

    let heads = store.meta_store().heads();
    assert_eq!(heads.len(), 1);
    assert_ne!(heads, first_heads);
    assert_eq!(store.load_meta(DEFAULT_BRANCH).await.unwrap(), Some(vec![second]));
}

#[tokio::test]
async fn replica_receives_pushed_meta_and_fetches_blocks() {
    let env = Env::new();
    let writer = env.open("laptop").await;
    let reader = env.open("phone").await;
    let a = block("doc A");

    let meta = writer
        .commit(&[a.clone()], json!({"clock": 1}), CommitOpts::default())
        .await
        .unwrap();
    writer.flush().await.unwrap();

    let mut received = Vec::new();
    for _ in 0..500 {
        received.extend(reader.take_received());
        if !received.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].meta, meta);

    // A local miss falls back to the remote and caches the block.
    let local = reader.loader().local_car_store();
    assert!(local.load(&a.cid).await.unwrap_err().is_not_found());
    assert_eq!(reader.get(&a.cid).await.unwrap(), a);
    assert_eq!(local.load(&a.cid).await.unwrap(), a);
}

// ---------------------------------------------------------------------------
// Local behaviour
// ---------------------------------------------------------------------------

#[tokio::test]
async fn local_only_keeps_backlog() {
    let env = Env::new();
    let mut config = env.config("local");
    config.remote_url = None;
    let store = Blockstore::open(config, &env.local).await.unwrap();

    store
        .commit(&[block("doc A")], json!({}), CommitOpts::default())
        .await
        .unwrap();
    store.flush().await.unwrap();
    assert_eq!(store.wal_stats().operations, 1);
    assert_eq!(store.wal_stats().passes, 0);
}

#[tokio::test]
async fn compaction_replaces_history_and_drops_old_cars() {
    let env = Env::new();
    let store = env.open("local").await;
    env.faults.data.fail_all_puts();
    let old = block("old");
    store
        .commit(&[old.clone()], json!({"clock": 1}), CommitOpts::default())
        .await
        .unwrap();
    settle(&store, 1).await;

    let compacted = block("compacted");
    let meta = store
        .commit(&[compacted.clone()], json!({"clock": 2}), CommitOpts::compact())
        .await
        .unwrap();
    let state = store.wal_state();
    assert!(state.operations.is_empty());
    assert_eq!(state.no_loader_ops, vec![meta]);
    assert_eq!(store.loader().car_log(), vec![compacted.cid]);
    assert!(store.get(&old.cid).await.unwrap_err().is_not_found());

    env.faults.data.heal();
    store.flush().await.unwrap();
    assert_eq!(store.wal_stats().no_loader_ops, 0);
    // Compacted commits carry no operation to push.
    assert_eq!(store.pull().await.unwrap(), None);
}

#[tokio::test]
async fn failed_remote_start_closes_local_stores() {
    let env = Env::new();
    let local_hooks = Arc::new(Lifecycle::default());
    let remote_hooks = Arc::new(Lifecycle {
        fail_start: Some(StoreType::Meta),
        ..Lifecycle::default()
    });
    let local = env.local.clone().with_interceptor(local_hooks.clone());
    let remote = env.remote.clone().with_interceptor(remote_hooks.clone());

    let err = Blockstore::open_with(env.config("local"), &local, &remote)
        .await
        .unwrap_err();
    assert!(matches!(err, BlockstoreError::Store(_)));
    // Local car, file and meta stores.
    assert_eq!(local_hooks.closes.load(Ordering::SeqCst), 3);
    // The remote stores that did start are closed as well.
    assert!(remote_hooks.closes.load(Ordering::SeqCst) >= 3);
}

#[tokio::test]
async fn closed_store_rejects_commits() {
    let env = Env::new();
    let store = env.open("local").await;
    store.close().await.unwrap();
    store.close().await.unwrap();
    let err = store
        .commit(&[block("late")], json!({}), CommitOpts::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BlockstoreError::Closed));
}

#[tokio::test]
async fn blocks_are_stored_encrypted() {
    let env = Env::new();
    let store = env.open("local").await;
    let secret = block("plaintext secret");
    store
        .commit(&[secret.clone()], json!({}), CommitOpts::no_loader())
        .await
        .unwrap();

    let car_url = store.loader().local_car_store().base().url();
    let raw_url = env.memory.build_url(&car_url, &secret.cid.to_hex()).await.unwrap();
    let raw = env.memory.get(&raw_url).await.unwrap();
    assert_ne!(raw, secret.bytes);
    assert!(!raw.windows(secret.bytes.len()).any(|w| w == &secret.bytes[..]));
}
