use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::debug;

use hearth_store::{DataStore, MetaEventHandler, MetaStore, StoreResult};
use hearth_types::{Cid, DbMeta};
use hearth_wal::Loadable;

/// Ordered record of the car blocks the local database still references.
#[derive(Debug, Default)]
pub struct CarLog {
    order: Vec<Cid>,
    index: HashSet<Cid>,
}

impl CarLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append cars not already logged.
    pub fn record(&mut self, cars: &[Cid]) {
        for cid in cars {
            if self.index.insert(*cid) {
                self.order.push(*cid);
            }
        }
    }

    /// Replace the whole log, returning the cars that were dropped.
    pub fn replace(&mut self, cars: &[Cid]) -> Vec<Cid> {
        let keep: HashSet<Cid> = cars.iter().copied().collect();
        let dropped = self
            .order
            .iter()
            .filter(|cid| !keep.contains(cid))
            .copied()
            .collect();
        self.order.clear();
        self.index.clear();
        self.record(cars);
        dropped
    }

    pub fn includes(&self, cid: &Cid) -> bool {
        self.index.contains(cid)
    }

    pub fn cars(&self) -> &[Cid] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Event CIDs a loader remembers for deduplication.
pub const SEEN_EVENTS_LIMIT: usize = 4096;

/// Recently received event CIDs, oldest forgotten first.
#[derive(Debug)]
struct SeenEvents {
    index: HashSet<Cid>,
    order: VecDeque<Cid>,
    limit: usize,
}

impl SeenEvents {
    fn new(limit: usize) -> Self {
        Self {
            index: HashSet::new(),
            order: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Returns `false` if `cid` is still remembered.
    fn insert(&mut self, cid: Cid) -> bool {
        if !self.index.insert(cid) {
            return false;
        }
        self.order.push_back(cid);
        while self.order.len() > self.limit {
            if let Some(oldest) = self.order.pop_front() {
                self.index.remove(&oldest);
            }
        }
        true
    }
}

/// Remote replication targets.
#[derive(Clone, Debug)]
pub struct RemoteStores {
    pub car: Arc<DataStore>,
    pub file: Arc<DataStore>,
    pub meta: MetaStore,
}

/// A metadata event received from a metadata store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMeta {
    pub event: Cid,
    pub parents: Vec<Cid>,
    pub meta: DbMeta,
}

/// The stores a database reads and writes, plus its car log.
///
/// Serves as the WAL's [`Loadable`] and as the [`MetaEventHandler`] of
/// both metadata stores; received events are kept for the merge layer to
/// take with [`BlockstoreLoader::take_received`]. Redelivered events are
/// dropped while they are among the last [`SEEN_EVENTS_LIMIT`] received.
#[derive(Debug)]
pub struct BlockstoreLoader {
    name: String,
    car_store: Arc<DataStore>,
    file_store: Arc<DataStore>,
    remote: Option<RemoteStores>,
    car_log: RwLock<CarLog>,
    received: Mutex<Vec<ReceivedMeta>>,
    seen: Mutex<SeenEvents>,
}

impl BlockstoreLoader {
    pub fn new(
        name: impl Into<String>,
        car_store: Arc<DataStore>,
        file_store: Arc<DataStore>,
        remote: Option<RemoteStores>,
    ) -> Self {
        Self {
            name: name.into(),
            car_store,
            file_store,
            remote,
            car_log: RwLock::new(CarLog::new()),
            received: Mutex::new(Vec::new()),
            seen: Mutex::new(SeenEvents::new(SEEN_EVENTS_LIMIT)),
        }
    }

    pub fn local_car_store(&self) -> &Arc<DataStore> {
        &self.car_store
    }

    pub fn local_file_store(&self) -> &Arc<DataStore> {
        &self.file_store
    }

    pub fn remote(&self) -> Option<&RemoteStores> {
        self.remote.as_ref()
    }

    pub fn record_cars(&self, cars: &[Cid]) {
        self.car_log
            .write()
            .expect("car log lock poisoned")
            .record(cars);
    }

    /// Replace the car log after a compaction; returns the dropped cars.
    pub fn compact_cars(&self, cars: &[Cid]) -> Vec<Cid> {
        self.car_log
            .write()
            .expect("car log lock poisoned")
            .replace(cars)
    }

    pub fn car_log(&self) -> Vec<Cid> {
        self.car_log
            .read()
            .expect("car log lock poisoned")
            .cars()
            .to_vec()
    }

    /// Drain the events received since the last call, oldest first.
    pub fn take_received(&self) -> Vec<ReceivedMeta> {
        std::mem::take(&mut *self.received.lock().expect("received lock poisoned"))
    }
}

impl Loadable for BlockstoreLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn car_store(&self) -> Arc<DataStore> {
        self.car_store.clone()
    }

    fn file_store(&self) -> Arc<DataStore> {
        self.file_store.clone()
    }

    fn remote_car_store(&self) -> Option<Arc<DataStore>> {
        self.remote.as_ref().map(|r| r.car.clone())
    }

    fn remote_file_store(&self) -> Option<Arc<DataStore>> {
        self.remote.as_ref().map(|r| r.file.clone())
    }

    fn remote_meta_store(&self) -> Option<MetaStore> {
        self.remote.as_ref().map(|r| r.meta.clone())
    }

    fn car_log_includes(&self, cid: &Cid) -> bool {
        self.car_log
            .read()
            .expect("car log lock poisoned")
            .includes(cid)
    }
}

#[async_trait]
impl MetaEventHandler for BlockstoreLoader {
    async fn handle_event(&self, cid: &Cid, parents: &[Cid], meta: &DbMeta) -> StoreResult<()> {
        // Events are redelivered by load and push alike.
        if !self.seen.lock().expect("seen lock poisoned").insert(*cid) {
            return Ok(());
        }
        debug!(event = %cid.short_hex(), cars = meta.cars.len(), "received meta event");
        self.received
            .lock()
            .expect("received lock poisoned")
            .push(ReceivedMeta {
                event: *cid,
                parents: parents.to_vec(),
                meta: meta.clone(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use hearth_crypto::MemoryKeyBag;
    use hearth_gateway::MemoryGateway;
    use hearth_types::StoreUrl;

    use super::*;

    fn cid(tag: &[u8]) -> Cid {
        Cid::from_bytes(tag)
    }

    fn loader() -> BlockstoreLoader {
        let gw = Arc::new(MemoryGateway::new());
        let kb = Arc::new(MemoryKeyBag::new());
        let store = |u: &str| {
            Arc::new(DataStore::new(
                "todos",
                StoreUrl::parse(u).unwrap(),
                gw.clone(),
                kb.clone(),
            ))
        };
        BlockstoreLoader::new(
            "todos",
            store("memory://local?name=todos"),
            store("memory://local?name=todos&index=files"),
            None,
        )
    }

    // ---- CarLog ----

    #[test]
    fn record_keeps_order_and_dedups() {
        let mut log = CarLog::new();
        log.record(&[cid(b"a"), cid(b"b")]);
        log.record(&[cid(b"a"), cid(b"c")]);
        assert_eq!(log.cars(), &[cid(b"a"), cid(b"b"), cid(b"c")]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn replace_reports_dropped_cars() {
        let mut log = CarLog::new();
        log.record(&[cid(b"a"), cid(b"b")]);
        let dropped = log.replace(&[cid(b"b"), cid(b"z")]);
        assert_eq!(dropped, vec![cid(b"a")]);
        assert!(!log.includes(&cid(b"a")));
        assert!(log.includes(&cid(b"z")));
    }

    #[test]
    fn seen_events_forget_the_oldest() {
        let mut seen = SeenEvents::new(2);
        assert!(seen.insert(cid(b"e1")));
        assert!(seen.insert(cid(b"e2")));
        assert!(!seen.insert(cid(b"e2")));
        assert!(seen.insert(cid(b"e3")));
        assert!(seen.insert(cid(b"e1")));
        assert!(!seen.insert(cid(b"e3")));
    }

    // ---- Loader ----

    #[test]
    fn local_only_loader_has_no_remotes() {
        let l = loader();
        assert!(l.remote_car_store().is_none());
        assert!(l.remote_meta_store().is_none());
        assert_eq!(l.name(), "todos");
    }

    #[test]
    fn car_log_backs_includes() {
        let l = loader();
        l.record_cars(&[cid(b"a")]);
        assert!(l.car_log_includes(&cid(b"a")));
        assert_eq!(l.compact_cars(&[cid(b"b")]), vec![cid(b"a")]);
        assert!(!l.car_log_includes(&cid(b"a")));
        assert_eq!(l.car_log(), vec![cid(b"b")]);
    }

    #[tokio::test]
    async fn redelivered_events_are_recorded_once() {
        let l = loader();
        let meta = DbMeta::new(vec![cid(b"car")]);
        l.handle_event(&cid(b"e1"), &[], &meta).await.unwrap();
        l.handle_event(&cid(b"e1"), &[], &meta).await.unwrap();
        l.handle_event(&cid(b"e2"), &[cid(b"e1")], &meta).await.unwrap();
        let received = l.take_received();
        assert_eq!(received.len(), 2);
        assert_eq!(received[1].parents, vec![cid(b"e1")]);
        assert!(l.take_received().is_empty());
    }
}
