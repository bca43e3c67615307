//! Encrypted, local-first blockstore for Hearth databases.
//!
//! Ties the lower crates together for one database:
//!
//! - [`BlockstoreConfig`] -- names, local/remote base URLs, WAL tuning
//! - [`StoreFactory`] -- resolves gateways from a
//!   [`GatewayRegistry`](hearth_gateway::GatewayRegistry), decorates them
//!   and builds stores
//! - [`BlockstoreLoader`] -- the car log plus the local and remote stores;
//!   the WAL's loader and the metadata stores' event handler
//! - [`Blockstore`] -- commit, read, flush and close
//!
//! ```no_run
//! # async fn demo() -> hearth_blockstore::BlockstoreResult<()> {
//! use std::sync::Arc;
//! use hearth_blockstore::{Blockstore, BlockstoreConfig, StoreFactory};
//! use hearth_crypto::MemoryKeyBag;
//! use hearth_gateway::{GatewayRegistry, MemoryGateway};
//! use hearth_types::{Block, CommitOpts};
//!
//! let registry = Arc::new(GatewayRegistry::with_memory(Arc::new(MemoryGateway::new())));
//! let factory = StoreFactory::new(registry, Arc::new(MemoryKeyBag::new()));
//! let config = BlockstoreConfig::new("todos").with_remote("memory://cloud");
//! let store = Blockstore::open(config, &factory).await?;
//!
//! let block = Block::new(b"{\"title\":\"write docs\"}".to_vec());
//! store.commit(&[block], serde_json::json!({"clock": 1}), CommitOpts::default()).await?;
//! store.flush().await?;
//! # Ok(())
//! # }
//! ```

pub mod blockstore;
pub mod config;
pub mod error;
pub mod factory;
pub mod loader;
pub mod telemetry;

pub use blockstore::Blockstore;
pub use config::{BlockstoreConfig, FILE_INDEX};
pub use error::{BlockstoreError, BlockstoreResult};
pub use factory::StoreFactory;
pub use loader::{BlockstoreLoader, CarLog, ReceivedMeta, RemoteStores, SEEN_EVENTS_LIMIT};
pub use telemetry::{init_tracing, parse_level};
