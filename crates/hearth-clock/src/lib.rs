//! Merkle-clock metadata for the Hearth blockstore.
//!
//! Every metadata save creates one immutable [`MetaEvent`] naming the heads
//! it was built on. Events form a DAG across saves and replicas; the
//! [`HeadSet`] tracks its current tips.
//!
//! # Invariants
//!
//! - An event's CID is the domain-separated hash of its encoded bytes.
//! - A CID that any observed event lists as a parent never appears in the
//!   head set again, whatever order events arrive in.

pub mod codec;
pub mod error;
pub mod event;
pub mod heads;

pub use codec::{decode_meta_document, encode_meta_document, DecodedEvent};
pub use error::{ClockError, ClockResult};
pub use event::{EventBlock, MetaEvent};
pub use heads::{HeadSet, SUPERSEDED_LIMIT};
