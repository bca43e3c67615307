use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::warn;

use hearth_types::{StoreType, StoreUrl};

use crate::error::GatewayError;
use crate::interceptor::{GatewayInterceptor, Intercept};

/// Sentinel for "fail until healed".
const FAIL_FOREVER: u64 = u64::MAX;

/// Interceptor that makes `put` calls fail on demand.
///
/// Used to exercise retry and crash-recovery paths. Failures can be limited
/// to one store type so that, for example, only remote metadata writes
/// fail while block uploads succeed.
#[derive(Debug, Default)]
pub struct FaultInjector {
    only: Option<StoreType>,
    remaining_failures: AtomicU64,
    put_calls: AtomicU64,
    failed_puts: AtomicU64,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict injected failures to URLs of one store type.
    pub fn only(store_type: StoreType) -> Self {
        Self {
            only: Some(store_type),
            ..Self::default()
        }
    }

    /// Fail the next `n` matching puts.
    pub fn fail_puts(&self, n: u64) {
        self.remaining_failures.store(n, Ordering::SeqCst);
    }

    /// Fail every matching put until [`FaultInjector::heal`] is called.
    pub fn fail_all_puts(&self) {
        self.remaining_failures.store(FAIL_FOREVER, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.remaining_failures.store(0, Ordering::SeqCst);
    }

    /// Puts seen, including failed ones.
    pub fn put_calls(&self) -> u64 {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn failed_puts(&self) -> u64 {
        self.failed_puts.load(Ordering::SeqCst)
    }

    fn matches(&self, url: &StoreUrl) -> bool {
        match self.only {
            Some(store_type) => url.store_type() == Some(store_type),
            None => true,
        }
    }

    /// Consume one failure credit, if any are left.
    fn take_failure(&self) -> bool {
        self.remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                FAIL_FOREVER => Some(FAIL_FOREVER),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

#[async_trait]
impl GatewayInterceptor for FaultInjector {
    async fn put(&self, url: &StoreUrl, body: Bytes) -> Intercept<(StoreUrl, Bytes), ()> {
        if !self.matches(url) {
            return Intercept::Continue((url.clone(), body));
        }
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            self.failed_puts.fetch_add(1, Ordering::SeqCst);
            warn!(url = %url, "injecting put failure");
            return Intercept::Stop(Err(GatewayError::Injected(format!("put {url}"))));
        }
        Intercept::Continue((url.clone(), body))
    }
}
