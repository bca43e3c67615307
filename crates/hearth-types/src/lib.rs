//! Foundation types for the Hearth blockstore.
//!
//! This crate provides the identifiers and payload types shared by every
//! other Hearth crate: gateways, stores, the merkle clock and the WAL.
//!
//! # Key Types
//!
//! - [`Cid`] -- Content identifier (BLAKE3 hash of a block's bytes)
//! - [`StoreUrl`] -- Addressable identifier of a store instance
//! - [`StoreType`] -- Which of the three store kinds a URL addresses
//! - [`Block`] -- Immutable bytes addressed by their [`Cid`]
//! - [`DbMeta`] -- Opaque CRDT head payload plus the car CIDs it needs
//! - [`FileOp`] -- A pending attachment upload
//! - [`CommitOpts`] -- Flags controlling how a commit enters the WAL

pub mod cid;
pub mod error;
pub mod meta;
pub mod store_url;

pub use cid::Cid;
pub use error::TypeError;
pub use meta::{Block, CommitOpts, DbMeta, FileOp};
pub use store_url::{param, StoreType, StoreUrl, STORAGE_VERSION};
