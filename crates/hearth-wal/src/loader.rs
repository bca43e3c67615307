use std::sync::Arc;

use hearth_store::{DataStore, MetaStore};
use hearth_types::Cid;

/// The stores and indexes a [`WalStore`](crate::WalStore) drains between.
///
/// Remote stores are optional; without a remote car store the WAL runs in
/// local-only mode and never drains.
pub trait Loadable: Send + Sync {
    /// Database name; also names the WAL's key.
    fn name(&self) -> &str;

    fn car_store(&self) -> Arc<DataStore>;

    fn file_store(&self) -> Arc<DataStore>;

    fn remote_car_store(&self) -> Option<Arc<DataStore>>;

    fn remote_file_store(&self) -> Option<Arc<DataStore>>;

    fn remote_meta_store(&self) -> Option<MetaStore>;

    /// Whether the local car log still lists `cid`.
    ///
    /// A block that is missing locally but still listed is corruption; one
    /// that is no longer listed was compacted away and is skipped.
    fn car_log_includes(&self, cid: &Cid) -> bool;
}
