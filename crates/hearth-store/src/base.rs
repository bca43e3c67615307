use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::OnceCell;
use tracing::{debug, error, info};
use uuid::Uuid;

use hearth_crypto::{KeyBag, KeyedCrypto};
use hearth_gateway::Gateway;
use hearth_types::{param, StoreType, StoreUrl};

use crate::error::{StoreError, StoreResult};

/// Callback run when a store starts or closes.
pub type StoreHook = Box<dyn Fn() + Send + Sync>;

fn guard_version(url: &StoreUrl) -> StoreResult<()> {
    if url.has_param(param::VERSION) {
        Ok(())
    } else {
        Err(StoreError::MissingVersion(url.to_string()))
    }
}

/// Lifecycle state shared by the concrete stores.
///
/// Concrete stores own a `BaseStore` and delegate their [`Store`]
/// implementation to it, passing their own ready hook to
/// [`BaseStore::start_with`].
///
/// [`Store`]: crate::Store
pub struct BaseStore {
    id: Uuid,
    name: String,
    store_type: StoreType,
    gateway: Arc<dyn Gateway>,
    keybag: Arc<dyn KeyBag>,
    url: RwLock<StoreUrl>,
    started: AtomicBool,
    crypto: OnceCell<Arc<dyn KeyedCrypto>>,
    on_started: Mutex<Vec<StoreHook>>,
    on_closed: Mutex<Vec<StoreHook>>,
}

impl BaseStore {
    pub fn new(
        name: impl Into<String>,
        store_type: StoreType,
        url: StoreUrl,
        gateway: Arc<dyn Gateway>,
        keybag: Arc<dyn KeyBag>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            store_type,
            gateway,
            keybag,
            url: RwLock::new(url),
            started: AtomicBool::new(false),
            crypto: OnceCell::new(),
            on_started: Mutex::new(Vec::new()),
            on_closed: Mutex::new(Vec::new()),
        }
    }

    /// Unique id of this store instance, for logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store_type(&self) -> StoreType {
        self.store_type
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    pub fn url(&self) -> StoreUrl {
        self.url.read().expect("store url lock poisoned").clone()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// The URL to use for I/O; fails until `start` has completed.
    pub fn started_url(&self) -> StoreResult<StoreUrl> {
        if !self.is_started() {
            return Err(StoreError::NotStarted(self.url().to_string()));
        }
        Ok(self.url())
    }

    /// Key name derived from `name[:index]:storeType`.
    pub fn key_name(&self) -> String {
        let mut parts = vec![self.name.clone()];
        if let Some(index) = self.url().param(param::INDEX) {
            parts.push(index);
        }
        parts.push(self.store_type.to_string());
        parts.join(":")
    }

    pub fn on_started(&self, hook: StoreHook) {
        self.on_started
            .lock()
            .expect("store hooks lock poisoned")
            .push(hook);
    }

    pub fn on_closed(&self, hook: StoreHook) {
        self.on_closed
            .lock()
            .expect("store hooks lock poisoned")
            .push(hook);
    }

    fn set_url(&self, url: StoreUrl) {
        *self.url.write().expect("store url lock poisoned") = url;
    }

    /// Start with no store-specific ready hook.
    pub async fn start(&self) -> StoreResult<StoreUrl> {
        self.start_with(|_| async { Ok(()) }).await
    }

    /// Run the start sequence, calling `ready` with the final URL after the
    /// version check. Any failure closes the gateway.
    pub async fn start_with<F, Fut>(&self, ready: F) -> StoreResult<StoreUrl>
    where
        F: FnOnce(StoreUrl) -> Fut + Send,
        Fut: Future<Output = StoreResult<()>> + Send,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(StoreError::AlreadyStarted(self.url().to_string()));
        }
        debug!(store = %self.store_type, id = %self.id, "starting store");
        match self.run_start(ready).await {
            Ok(url) => {
                for hook in self.on_started.lock().expect("store hooks lock poisoned").iter() {
                    hook();
                }
                info!(store = %self.store_type, name = %self.name, url = %url, "store started");
                Ok(url)
            }
            Err(e) => {
                error!(store = %self.store_type, name = %self.name, error = %e, "store start failed");
                if let Err(close_err) = self.close().await {
                    debug!(error = %close_err, "close after failed start");
                }
                Err(e)
            }
        }
    }

    async fn run_start<F, Fut>(&self, ready: F) -> StoreResult<StoreUrl>
    where
        F: FnOnce(StoreUrl) -> Fut + Send,
        Fut: Future<Output = StoreResult<()>> + Send,
    {
        let url = self.url().with_param(param::STORE, self.store_type.as_str());
        self.set_url(url.clone());

        let url = self.gateway.start(&url).await?;
        self.set_url(url.clone());

        let url = self
            .keybag
            .ensure_key_from_url(&url, &self.key_name())
            .await?;
        self.set_url(url.clone());

        guard_version(&url)?;
        ready(url.clone()).await?;
        Ok(url)
    }

    /// The store's crypto, resolved from its key reference on first use.
    pub async fn crypto(&self) -> StoreResult<Arc<dyn KeyedCrypto>> {
        let url = self.started_url()?;
        let crypto = self
            .crypto
            .get_or_try_init(|| async { self.keybag.keyed_crypto(&url).await })
            .await?;
        Ok(crypto.clone())
    }

    pub async fn close(&self) -> StoreResult<()> {
        let url = self.url();
        self.gateway.close(&url).await?;
        self.started.store(false, Ordering::SeqCst);
        for hook in self.on_closed.lock().expect("store hooks lock poisoned").iter() {
            hook();
        }
        debug!(store = %self.store_type, url = %url, "store closed");
        Ok(())
    }

    pub async fn destroy(&self) -> StoreResult<()> {
        let url = self.url();
        self.gateway.destroy(&url).await?;
        info!(store = %self.store_type, url = %url, "store destroyed");
        Ok(())
    }
}

impl fmt::Debug for BaseStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseStore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("store_type", &self.store_type)
            .field("url", &self.url())
            .field("started", &self.is_started())
            .finish()
    }
}
