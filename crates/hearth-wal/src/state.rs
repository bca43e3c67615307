use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use hearth_types::{DbMeta, FileOp};

use crate::error::{WalError, WalResult};

/// The persisted WAL document.
///
/// ```json
/// { "operations": [...], "noLoaderOps": [...], "fileOperations": [...] }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalState {
    /// Pending commits.
    #[serde(default)]
    pub operations: Vec<DbMeta>,
    /// Commits recorded during compaction.
    #[serde(default)]
    pub no_loader_ops: Vec<DbMeta>,
    /// Pending attachment uploads.
    #[serde(default)]
    pub file_operations: Vec<FileOp>,
}

impl WalState {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.no_loader_ops.is_empty() && self.file_operations.is_empty()
    }

    pub fn encode(&self) -> WalResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| WalError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> WalResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| WalError::Serialization(e.to_string()))
    }
}

/// Stable handle to an item in a [`PendingQueue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueHandle(u64);

/// Insertion-ordered arena of pending items.
///
/// Items are removed by handle in `O(log n)`, so a drain pass can retire
/// exactly the items it uploaded while new items keep arriving.
#[derive(Clone, Debug)]
pub struct PendingQueue<T> {
    next: u64,
    items: BTreeMap<u64, T>,
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self {
            next: 0,
            items: BTreeMap::new(),
        }
    }
}

impl<T: Clone> PendingQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: T) -> QueueHandle {
        let handle = self.next;
        self.next += 1;
        self.items.insert(handle, item);
        QueueHandle(handle)
    }

    pub fn remove(&mut self, handle: QueueHandle) -> Option<T> {
        self.items.remove(&handle.0)
    }

    /// Put an item back under its original handle, keeping its position.
    pub fn restore(&mut self, handle: QueueHandle, item: T) {
        self.items.insert(handle.0, item);
    }

    pub fn contains(&self, handle: QueueHandle) -> bool {
        self.items.contains_key(&handle.0)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Copy of every item with its handle, oldest first.
    pub fn snapshot(&self) -> Vec<(QueueHandle, T)> {
        self.items
            .iter()
            .map(|(handle, item)| (QueueHandle(*handle), item.clone()))
            .collect()
    }

    /// Items oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.values().cloned().collect()
    }
}

impl<T: Clone> FromIterator<T> for PendingQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut queue = Self::new();
        for item in iter {
            queue.push(item);
        }
        queue
    }
}

/// The three live queues of a WAL store.
#[derive(Clone, Debug, Default)]
pub struct WalQueues {
    pub operations: PendingQueue<DbMeta>,
    pub no_loader_ops: PendingQueue<DbMeta>,
    pub file_operations: PendingQueue<FileOp>,
    /// Compactions applied since the queues were loaded. Not persisted.
    pub compactions: u64,
}

impl WalQueues {
    pub fn from_state(state: WalState) -> Self {
        Self {
            operations: state.operations.into_iter().collect(),
            no_loader_ops: state.no_loader_ops.into_iter().collect(),
            file_operations: state.file_operations.into_iter().collect(),
            compactions: 0,
        }
    }

    /// Replace all pending commits with the single compacted one.
    pub fn compact(&mut self, meta: DbMeta) {
        self.operations.clear();
        self.no_loader_ops.clear();
        self.no_loader_ops.push(meta);
        self.compactions += 1;
    }

    pub fn to_state(&self) -> WalState {
        WalState {
            operations: self.operations.to_vec(),
            no_loader_ops: self.no_loader_ops.to_vec(),
            file_operations: self.file_operations.to_vec(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.no_loader_ops.is_empty() && self.file_operations.is_empty()
    }
}
