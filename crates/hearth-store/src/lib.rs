//! Stores for the Hearth blockstore.
//!
//! Every store sits on a [`Gateway`](hearth_gateway::Gateway) and shares the
//! lifecycle implemented by [`BaseStore`]:
//!
//! 1. set the `store` parameter on the URL
//! 2. start the gateway (which may add `version`)
//! 3. bind a key reference through the key bag
//! 4. require a `version` parameter
//! 5. run the store's ready hook, then the `on_started` hooks
//!
//! A failure at any step closes the gateway and returns the error.
//!
//! # Stores
//!
//! - [`MetaStore`] -- merkle-clock head pointers per branch
//! - [`DataStore`] -- content-addressed, encrypted blocks
//!
//! The write-ahead log store lives in `hearth-wal` and reuses [`BaseStore`].

pub mod base;
pub mod data;
pub mod error;
pub mod meta;
pub mod traits;

pub use base::{BaseStore, StoreHook};
pub use data::DataStore;
pub use error::{StoreError, StoreResult};
pub use meta::{MetaStore, DEFAULT_BRANCH};
pub use traits::{MetaEventHandler, Store};
