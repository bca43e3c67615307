//! Metadata store.
//!
//! Each branch's document holds the merkle-clock events written to it. The
//! store tracks the local head set: `save` writes one event on top of the
//! current heads and collapses the set to that event; `load` and push
//! notifications fold decoded events into the set.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use hearth_clock::{decode_meta_document, encode_meta_document, DecodedEvent, EventBlock, HeadSet};
use hearth_crypto::KeyBag;
use hearth_gateway::{Gateway, Subscription};
use hearth_types::{Cid, DbMeta, StoreType, StoreUrl};

use crate::base::BaseStore;
use crate::error::StoreResult;
use crate::traits::{MetaEventHandler, Store};

/// Branch used when none is given.
pub const DEFAULT_BRANCH: &str = "main";

struct MetaInner {
    base: BaseStore,
    heads: Mutex<HeadSet>,
    handler: RwLock<Option<Arc<dyn MetaEventHandler>>>,
}

impl MetaInner {
    fn handler(&self) -> Option<Arc<dyn MetaEventHandler>> {
        self.handler.read().expect("handler lock poisoned").clone()
    }

    /// Report decoded events to the handler, then fold them into the heads.
    async fn apply(&self, events: &[DecodedEvent]) {
        if let Some(handler) = self.handler() {
            for event in events {
                let block = &event.block;
                if let Err(e) = handler
                    .handle_event(&block.cid(), &event.parents, block.data())
                    .await
                {
                    error!(cid = %block.cid(), error = %e, "meta event handler failed");
                }
            }
        }
        let mut heads = self.heads.lock().expect("head set lock poisoned");
        heads.advance(events.iter().map(|event| &event.block));
        debug!(events = events.len(), heads = heads.len(), "applied meta events");
    }
}

/// Persists the database's causal head pointers per branch.
///
/// Cloning is cheap; clones share the head set and subscription.
#[derive(Clone)]
pub struct MetaStore {
    inner: Arc<MetaInner>,
    subscription: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MetaStore {
    pub fn new(
        name: impl Into<String>,
        url: StoreUrl,
        gateway: Arc<dyn Gateway>,
        keybag: Arc<dyn KeyBag>,
    ) -> Self {
        let base = BaseStore::new(name, StoreType::Meta, url, gateway, keybag);
        let subscription: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::new(Mutex::new(None));
        let on_close = subscription.clone();
        base.on_closed(Box::new(move || {
            if let Some(task) = on_close.lock().expect("subscription lock poisoned").take() {
                task.abort();
            }
        }));
        Self {
            inner: Arc::new(MetaInner {
                base,
                heads: Mutex::new(HeadSet::new()),
                handler: RwLock::new(None),
            }),
            subscription,
        }
    }

    /// Install the handler that receives every decoded event.
    pub fn set_handler(&self, handler: Arc<dyn MetaEventHandler>) {
        *self.inner.handler.write().expect("handler lock poisoned") = Some(handler);
    }

    pub fn base(&self) -> &BaseStore {
        &self.inner.base
    }

    /// Current merkle-clock heads, sorted.
    pub fn heads(&self) -> Vec<Cid> {
        self.inner.heads.lock().expect("head set lock poisoned").heads()
    }

    /// Returns `true` while a push subscription task is running.
    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .lock()
            .expect("subscription lock poisoned")
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    async fn branch_url(&self, branch: &str) -> StoreResult<StoreUrl> {
        let url = self.inner.base.started_url()?;
        Ok(self.inner.base.gateway().build_url(&url, branch).await?)
    }

    /// Load a branch.
    ///
    /// Returns `None` when nothing was ever written to the branch, and the
    /// decoded payloads otherwise (possibly an empty list).
    pub async fn load(&self, branch: &str) -> StoreResult<Option<Vec<DbMeta>>> {
        let url = self.branch_url(branch).await?;
        debug!(branch, url = %url, "loading meta");
        let bytes = match self.inner.base.gateway().get(&url).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                debug!(branch, "no meta for branch");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let events = decode_meta_document(&bytes)?;
        self.inner.apply(&events).await;
        Ok(Some(
            events
                .into_iter()
                .map(|event| event.block.into_data())
                .collect(),
        ))
    }

    /// Write `meta` as a new event on top of the current heads.
    ///
    /// The head set collapses to the new event only after the write
    /// succeeds. Returns the new event's CID.
    pub async fn save(&self, meta: &DbMeta, branch: &str) -> StoreResult<Cid> {
        let url = self.branch_url(branch).await?;
        let parents = self.heads();
        let event = EventBlock::create(meta.clone(), parents.iter().copied())?;
        let document = encode_meta_document(std::slice::from_ref(&event))?;
        self.inner.base.gateway().put(&url, document).await?;
        self.inner
            .heads
            .lock()
            .expect("head set lock poisoned")
            .collapse_to(event.cid());
        debug!(branch, cid = %event.cid(), parents = parents.len(), cars = meta.cars.len(), "saved meta");
        Ok(event.cid())
    }

    async fn subscribe(&self) {
        let gateway = self.inner.base.gateway().clone();
        if !gateway.can_subscribe() {
            return;
        }
        let url = self.inner.base.url();
        let rx = match gateway.subscribe(&url).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(url = %url, error = %e, "meta subscription unavailable");
                return;
            }
        };
        let task = tokio::spawn(run_subscription(Arc::downgrade(&self.inner), rx));
        if let Some(old) = self
            .subscription
            .lock()
            .expect("subscription lock poisoned")
            .replace(task)
        {
            old.abort();
        }
        info!(url = %url, "subscribed to meta updates");
    }
}

async fn run_subscription(inner: std::sync::Weak<MetaInner>, mut rx: Subscription) {
    loop {
        let body: Bytes = match rx.recv().await {
            Ok(body) => body,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "meta subscription lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match decode_meta_document(&body) {
            Ok(events) => inner.apply(&events).await,
            Err(e) => warn!(error = %e, "dropping undecodable meta notification"),
        }
    }
    debug!("meta subscription ended");
}

#[async_trait]
impl Store for MetaStore {
    fn store_type(&self) -> StoreType {
        StoreType::Meta
    }

    fn url(&self) -> StoreUrl {
        self.inner.base.url()
    }

    async fn start(&self) -> StoreResult<StoreUrl> {
        let url = self.inner.base.start().await?;
        self.subscribe().await;
        Ok(url)
    }

    async fn close(&self) -> StoreResult<()> {
        self.inner.base.close().await
    }

    async fn destroy(&self) -> StoreResult<()> {
        self.inner.base.destroy().await
    }
}

impl fmt::Debug for MetaStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaStore")
            .field("base", &self.inner.base)
            .field("heads", &self.heads().len())
            .finish()
    }
}
