//! Interceptor decorator.
//!
//! Every call to an [`InterceptorGateway`] is first offered to its
//! [`GatewayInterceptor`]. The interceptor either hands back a (possibly
//! rewritten) operation for the inner gateway, or stops the call with its
//! own result.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace};

use hearth_types::StoreUrl;

use crate::error::{GatewayError, GatewayResult};
use crate::traits::{Gateway, Subscription};

/// Outcome of an interceptor hook.
#[derive(Debug)]
pub enum Intercept<Op, T> {
    /// Forward `Op` to the inner gateway.
    Continue(Op),
    /// Return this result without touching the inner gateway.
    Stop(GatewayResult<T>),
}

impl<Op, T> Intercept<Op, T> {
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stop(_))
    }
}

/// Hooks run before each gateway operation.
///
/// Every method defaults to forwarding the call unchanged, so an
/// implementation only overrides the operations it cares about.
#[async_trait]
pub trait GatewayInterceptor: Send + Sync {
    async fn start(&self, url: &StoreUrl) -> Intercept<StoreUrl, StoreUrl> {
        Intercept::Continue(url.clone())
    }

    async fn build_url(&self, url: &StoreUrl, key: &str) -> Intercept<(StoreUrl, String), StoreUrl> {
        Intercept::Continue((url.clone(), key.to_string()))
    }

    async fn put(&self, url: &StoreUrl, body: Bytes) -> Intercept<(StoreUrl, Bytes), ()> {
        Intercept::Continue((url.clone(), body))
    }

    async fn get(&self, url: &StoreUrl) -> Intercept<StoreUrl, Bytes> {
        Intercept::Continue(url.clone())
    }

    async fn delete(&self, url: &StoreUrl) -> Intercept<StoreUrl, ()> {
        Intercept::Continue(url.clone())
    }

    async fn close(&self, url: &StoreUrl) -> Intercept<StoreUrl, ()> {
        Intercept::Continue(url.clone())
    }

    async fn destroy(&self, url: &StoreUrl) -> Intercept<StoreUrl, ()> {
        Intercept::Continue(url.clone())
    }

    async fn subscribe(&self, url: &StoreUrl) -> Intercept<StoreUrl, Subscription> {
        Intercept::Continue(url.clone())
    }
}

/// Interceptor that forwards everything unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl GatewayInterceptor for PassThrough {}

/// Gateway decorator that routes every call through an interceptor.
pub struct InterceptorGateway {
    inner: Arc<dyn Gateway>,
    interceptor: Arc<dyn GatewayInterceptor>,
}

impl InterceptorGateway {
    pub fn new(inner: Arc<dyn Gateway>, interceptor: Arc<dyn GatewayInterceptor>) -> Self {
        Self { inner, interceptor }
    }

    /// Wrap `inner` with the [`PassThrough`] interceptor.
    pub fn pass_through(inner: Arc<dyn Gateway>) -> Self {
        Self::new(inner, Arc::new(PassThrough))
    }
}

fn stopped(op: &'static str, url: &StoreUrl) {
    debug!(op, url = %url, "interceptor stopped call");
}

#[async_trait]
impl Gateway for InterceptorGateway {
    async fn start(&self, url: &StoreUrl) -> GatewayResult<StoreUrl> {
        match self.interceptor.start(url).await {
            Intercept::Continue(url) => self.inner.start(&url).await,
            Intercept::Stop(result) => {
                stopped("start", url);
                result
            }
        }
    }

    async fn build_url(&self, url: &StoreUrl, key: &str) -> GatewayResult<StoreUrl> {
        match self.interceptor.build_url(url, key).await {
            Intercept::Continue((url, key)) => self.inner.build_url(&url, &key).await,
            Intercept::Stop(result) => {
                stopped("build_url", url);
                result
            }
        }
    }

    async fn put(&self, url: &StoreUrl, body: Bytes) -> GatewayResult<()> {
        match self.interceptor.put(url, body).await {
            Intercept::Continue((url, body)) => {
                trace!(url = %url, len = body.len(), "forwarding put");
                self.inner.put(&url, body).await
            }
            Intercept::Stop(result) => {
                stopped("put", url);
                result
            }
        }
    }

    async fn get(&self, url: &StoreUrl) -> GatewayResult<Bytes> {
        match self.interceptor.get(url).await {
            Intercept::Continue(url) => self.inner.get(&url).await,
            Intercept::Stop(result) => {
                stopped("get", url);
                result
            }
        }
    }

    async fn delete(&self, url: &StoreUrl) -> GatewayResult<()> {
        match self.interceptor.delete(url).await {
            Intercept::Continue(url) => self.inner.delete(&url).await,
            Intercept::Stop(result) => {
                stopped("delete", url);
                result
            }
        }
    }

    async fn close(&self, url: &StoreUrl) -> GatewayResult<()> {
        match self.interceptor.close(url).await {
            Intercept::Continue(url) => self.inner.close(&url).await,
            Intercept::Stop(result) => {
                stopped("close", url);
                result
            }
        }
    }

    async fn destroy(&self, url: &StoreUrl) -> GatewayResult<()> {
        match self.interceptor.destroy(url).await {
            Intercept::Continue(url) => self.inner.destroy(&url).await,
            Intercept::Stop(result) => {
                stopped("destroy", url);
                result
            }
        }
    }

    fn can_subscribe(&self) -> bool {
        self.inner.can_subscribe()
    }

    async fn subscribe(&self, url: &StoreUrl) -> GatewayResult<Subscription> {
        if !self.inner.can_subscribe() {
            return Err(GatewayError::Unsupported(format!("subscribe on {url}")));
        }
        match self.interceptor.subscribe(url).await {
            Intercept::Continue(url) => self.inner.subscribe(&url).await,
            Intercept::Stop(result) => {
                stopped("subscribe", url);
                result
            }
        }
    }
}
