use bytes::Bytes;
use serde::{Deserialize, Serialize};

use hearth_crypto::ContentHasher;
use hearth_types::{Cid, DbMeta};

use crate::error::{ClockError, ClockResult};

/// One merkle-clock event: a metadata payload plus the heads it builds on.
///
/// Parents are kept sorted and deduplicated, so two replicas that build the
/// same event from the same head set produce the same bytes and CID.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaEvent {
    pub parents: Vec<Cid>,
    pub data: DbMeta,
}

impl MetaEvent {
    pub fn new(data: DbMeta, parents: impl IntoIterator<Item = Cid>) -> Self {
        let mut parents: Vec<Cid> = parents.into_iter().collect();
        parents.sort();
        parents.dedup();
        Self { parents, data }
    }

    /// Encode to the canonical byte form that the event CID is computed over.
    pub fn encode(&self) -> ClockResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ClockError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> ClockResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ClockError::InvalidData(e.to_string()))
    }
}

/// An encoded event together with its CID.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventBlock {
    cid: Cid,
    bytes: Bytes,
    event: MetaEvent,
}

impl EventBlock {
    /// Build and encode a new event.
    pub fn create(data: DbMeta, parents: impl IntoIterator<Item = Cid>) -> ClockResult<Self> {
        let event = MetaEvent::new(data, parents);
        let bytes = Bytes::from(event.encode()?);
        Ok(Self {
            cid: ContentHasher::EVENT.hash(&bytes),
            bytes,
            event,
        })
    }

    /// Decode event bytes, computing the CID from them.
    pub fn decode(bytes: impl Into<Bytes>) -> ClockResult<Self> {
        let bytes = bytes.into();
        let event = MetaEvent::decode(&bytes)?;
        Ok(Self {
            cid: ContentHasher::EVENT.hash(&bytes),
            bytes,
            event,
        })
    }

    pub fn cid(&self) -> Cid {
        self.cid
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn event(&self) -> &MetaEvent {
        &self.event
    }

    pub fn parents(&self) -> &[Cid] {
        &self.event.parents
    }

    pub fn data(&self) -> &DbMeta {
        &self.event.data
    }

    pub fn into_data(self) -> DbMeta {
        self.event.data
    }
}
