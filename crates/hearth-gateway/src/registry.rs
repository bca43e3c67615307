use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::debug;

use hearth_types::StoreUrl;

use crate::error::{GatewayError, GatewayResult};
use crate::memory::MemoryGateway;
use crate::traits::Gateway;

/// Builds the gateway for a store URL.
pub type GatewayConstructor =
    Arc<dyn Fn(&StoreUrl) -> GatewayResult<Arc<dyn Gateway>> + Send + Sync>;

/// Maps URL schemes to gateway constructors.
///
/// The registry is an explicit value handed to whoever opens stores, so
/// independent databases in one process can use different backends.
#[derive(Default)]
pub struct GatewayRegistry {
    constructors: RwLock<HashMap<String, GatewayConstructor>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry serving the `memory` scheme from one shared gateway.
    pub fn with_memory(gateway: Arc<MemoryGateway>) -> Self {
        let registry = Self::new();
        registry.register(
            "memory",
            Arc::new(move |_url: &StoreUrl| -> GatewayResult<Arc<dyn Gateway>> {
                Ok(gateway.clone())
            }),
        );
        registry
    }

    /// Register (or replace) the constructor for `scheme`.
    pub fn register(&self, scheme: impl Into<String>, constructor: GatewayConstructor) {
        let scheme = scheme.into();
        debug!(scheme = %scheme, "registered gateway");
        self.constructors
            .write()
            .expect("registry lock poisoned")
            .insert(scheme, constructor);
    }

    /// Build the gateway for `url`'s scheme.
    pub fn resolve(&self, url: &StoreUrl) -> GatewayResult<Arc<dyn Gateway>> {
        let constructor = self
            .constructors
            .read()
            .expect("registry lock poisoned")
            .get(url.scheme())
            .cloned()
            .ok_or_else(|| GatewayError::UnknownScheme(url.scheme().to_string()))?;
        constructor(url)
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self
            .constructors
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        schemes.sort();
        schemes
    }
}

impl fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}
