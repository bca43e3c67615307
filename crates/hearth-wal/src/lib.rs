//! Write-ahead log for the Hearth blockstore.
//!
//! The WAL records every local commit that still has to reach the remote
//! store, then drains that backlog in the background:
//!
//! 1. upload every car block the pending commits reference, compacted
//!    commits first (at most [`WalConfig::upload_concurrency`] items in
//!    flight, each retried up to [`WalConfig::max_attempts`] times)
//! 2. upload pending attachment files
//! 3. only if every upload succeeded and no compaction superseded the
//!    pass, push the newest commit's metadata to the remote metadata store
//! 4. persist the remaining backlog, whatever the outcome
//!
//! A failed phase ends the pass; later phases wait for the next one.
//!
//! Drain passes are serialized by a [`CommitQueue`]; enqueues never wait
//! for a pass.

pub mod commit_queue;
pub mod config;
pub mod error;
pub mod loader;
pub mod retry;
pub mod state;
pub mod store;

pub use commit_queue::CommitQueue;
pub use config::WalConfig;
pub use error::{WalError, WalResult};
pub use loader::Loadable;
pub use retry::{RetryHandle, RetryPolicy};
pub use state::{PendingQueue, QueueHandle, WalQueues, WalState};
pub use store::{WalStats, WalStore};
