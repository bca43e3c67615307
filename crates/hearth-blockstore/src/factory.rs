use std::fmt;
use std::sync::Arc;

use tracing::debug;

use hearth_crypto::KeyBag;
use hearth_gateway::{
    FragmentGateway, Gateway, GatewayInterceptor, GatewayRegistry, InterceptorGateway,
};
use hearth_store::{DataStore, MetaStore};
use hearth_types::StoreUrl;
use hearth_wal::{Loadable, WalConfig, WalStore};

use crate::error::BlockstoreResult;

/// Builds decorated gateways and the stores that sit on them.
///
/// Every gateway is resolved from the registry by URL scheme and wrapped,
/// innermost first, in an [`InterceptorGateway`] (pass-through unless an
/// interceptor was supplied) and a [`FragmentGateway`].
#[derive(Clone)]
pub struct StoreFactory {
    registry: Arc<GatewayRegistry>,
    keybag: Arc<dyn KeyBag>,
    interceptor: Option<Arc<dyn GatewayInterceptor>>,
}

impl StoreFactory {
    pub fn new(registry: Arc<GatewayRegistry>, keybag: Arc<dyn KeyBag>) -> Self {
        Self {
            registry,
            keybag,
            interceptor: None,
        }
    }

    /// Route every gateway call made by stores from this factory through
    /// `interceptor`.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn GatewayInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn keybag(&self) -> &Arc<dyn KeyBag> {
        &self.keybag
    }

    pub fn gateway(&self, url: &StoreUrl) -> BlockstoreResult<Arc<dyn Gateway>> {
        let backend = self.registry.resolve(url)?;
        let intercepted = match &self.interceptor {
            Some(interceptor) => InterceptorGateway::new(backend, interceptor.clone()),
            None => InterceptorGateway::pass_through(backend),
        };
        debug!(scheme = url.scheme(), intercepted = self.interceptor.is_some(), "built gateway");
        Ok(Arc::new(FragmentGateway::new(Arc::new(intercepted))))
    }

    pub fn meta_store(&self, name: &str, url: StoreUrl) -> BlockstoreResult<MetaStore> {
        let gateway = self.gateway(&url)?;
        Ok(MetaStore::new(name, url, gateway, self.keybag.clone()))
    }

    pub fn data_store(&self, name: &str, url: StoreUrl) -> BlockstoreResult<Arc<DataStore>> {
        let gateway = self.gateway(&url)?;
        Ok(Arc::new(DataStore::new(name, url, gateway, self.keybag.clone())))
    }

    pub fn wal_store(
        &self,
        loader: Arc<dyn Loadable>,
        url: StoreUrl,
        config: WalConfig,
    ) -> BlockstoreResult<Arc<WalStore>> {
        let gateway = self.gateway(&url)?;
        Ok(Arc::new(WalStore::new(
            loader,
            url,
            gateway,
            self.keybag.clone(),
            config,
        )))
    }
}

impl fmt::Debug for StoreFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreFactory")
            .field("registry", &self.registry)
            .field("intercepted", &self.interceptor.is_some())
            .finish()
    }
}
