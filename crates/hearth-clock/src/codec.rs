//! Metadata document codec.
//!
//! A branch's metadata document is a JSON array with one entry per event:
//!
//! ```json
//! [{ "cid": "<event cid>", "data": "<hex event bytes>", "parents": ["<cid>", ...] }]
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use hearth_types::Cid;

use crate::error::{ClockError, ClockResult};
use crate::event::EventBlock;

#[derive(Debug, Serialize, Deserialize)]
struct MetaEntry {
    cid: Cid,
    data: String,
    parents: Vec<Cid>,
}

/// One decoded document entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedEvent {
    pub block: EventBlock,
    pub parents: Vec<Cid>,
}

/// Encode events into a metadata document.
pub fn encode_meta_document(events: &[EventBlock]) -> ClockResult<Bytes> {
    let entries: Vec<MetaEntry> = events
        .iter()
        .map(|event| MetaEntry {
            cid: event.cid(),
            data: hex::encode(event.bytes()),
            parents: event.parents().to_vec(),
        })
        .collect();
    let json = serde_json::to_vec(&entries).map_err(|e| ClockError::Serialization(e.to_string()))?;
    Ok(Bytes::from(json))
}

/// Decode a metadata document, verifying every entry.
///
/// An empty array decodes to no events.
pub fn decode_meta_document(bytes: &[u8]) -> ClockResult<Vec<DecodedEvent>> {
    let entries: Vec<MetaEntry> =
        serde_json::from_slice(bytes).map_err(|e| ClockError::InvalidData(e.to_string()))?;
    if entries.is_empty() {
        debug!("metadata document has no entries");
    }
    entries
        .into_iter()
        .map(|entry| {
            let raw = hex::decode(&entry.data).map_err(|e| ClockError::InvalidData(e.to_string()))?;
            let block = EventBlock::decode(raw)?;
            if block.cid() != entry.cid {
                return Err(ClockError::CidMismatch {
                    declared: entry.cid,
                    computed: block.cid(),
                });
            }
            let mut parents = entry.parents;
            parents.sort();
            parents.dedup();
            if parents != block.parents() {
                return Err(ClockError::ParentMismatch(block.cid()));
            }
            Ok(DecodedEvent { block, parents })
        })
        .collect()
}
