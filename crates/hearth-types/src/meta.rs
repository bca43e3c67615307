use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cid::Cid;

/// Immutable bytes addressed by their content identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub cid: Cid,
    pub bytes: Bytes,
}

impl Block {
    /// Create a block, computing its CID from the bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            cid: Cid::from_bytes(&bytes),
            bytes,
        }
    }

    /// Pair bytes with an already-known CID (e.g. after a load).
    pub fn with_cid(cid: Cid, bytes: impl Into<Bytes>) -> Self {
        Self {
            cid,
            bytes: bytes.into(),
        }
    }

    /// Returns `true` if the bytes hash to the block's CID.
    pub fn verify(&self) -> bool {
        Cid::from_bytes(&self.bytes) == self.cid
    }
}

/// Database head metadata.
///
/// `payload` is the CRDT's serialized head state and is never interpreted
/// by the storage layer. `cars` lists every car block needed to
/// reconstruct it; the WAL uploads exactly these before advancing remote
/// metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbMeta {
    pub cars: Vec<Cid>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl DbMeta {
    /// Metadata referencing the given cars with an empty payload.
    pub fn new(cars: Vec<Cid>) -> Self {
        Self {
            cars,
            payload: Value::Null,
        }
    }

    /// Attach an opaque payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// A pending attachment upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileOp {
    pub cid: Cid,
    pub public: bool,
}

/// Flags controlling how a commit enters the WAL.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitOpts {
    /// Record the commit without scheduling a drain pass.
    pub no_loader: bool,
    /// The commit is a compaction: it supersedes all pending history.
    pub compact: bool,
}

impl CommitOpts {
    pub fn no_loader() -> Self {
        Self {
            no_loader: true,
            ..Self::default()
        }
    }

    pub fn compact() -> Self {
        Self {
            compact: true,
            ..Self::default()
        }
    }
}
