use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Mutex;

/// Runs submitted jobs one at a time, in submission order.
///
/// Backed by tokio's fair mutex, so waiting jobs are served FIFO.
#[derive(Debug, Default)]
pub struct CommitQueue {
    lock: Mutex<()>,
    pending: AtomicUsize,
}

/// Decrements the pending counter even if the job future is dropped.
struct PendingGuard<'a>(&'a AtomicUsize);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CommitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access, then run `job`.
    pub async fn enqueue<F, Fut, T>(&self, job: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let _pending = PendingGuard(&self.pending);
        let _exclusive = self.lock.lock().await;
        job().await
    }

    /// Jobs waiting or running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }
}
