//! Head-set bookkeeping.
//!
//! The head set is the set of event CIDs not yet superseded by a newer
//! event that lists them as a parent. [`HeadSet`] also remembers every CID
//! it has seen referenced as a parent, which makes [`HeadSet::advance`]
//! independent of arrival order: an event that arrives after one of its
//! descendants never re-enters the set.
//!
//! That memory holds at most [`SUPERSEDED_LIMIT`] CIDs by default, oldest
//! forgotten first. An event arriving after that many newer supersessions
//! is treated as unseen.

use std::collections::{BTreeSet, HashSet, VecDeque};

use tracing::trace;

use hearth_types::Cid;

use crate::event::EventBlock;

/// Superseded CIDs a [`HeadSet`] remembers by default.
pub const SUPERSEDED_LIMIT: usize = 4096;

#[derive(Clone, Debug)]
pub struct HeadSet {
    heads: BTreeSet<Cid>,
    superseded: HashSet<Cid>,
    superseded_order: VecDeque<Cid>,
    limit: usize,
}

impl Default for HeadSet {
    fn default() -> Self {
        Self::with_superseded_limit(SUPERSEDED_LIMIT)
    }
}

impl HeadSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_superseded_limit(limit: usize) -> Self {
        Self {
            heads: BTreeSet::new(),
            superseded: HashSet::new(),
            superseded_order: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Current heads, sorted.
    pub fn heads(&self) -> Vec<Cid> {
        self.heads.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.heads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.heads.contains(cid)
    }

    /// Returns `true` if some observed event lists `cid` as a parent.
    pub fn is_superseded(&self, cid: &Cid) -> bool {
        self.superseded.contains(cid)
    }

    /// Apply one observed event. Re-observing an event is a no-op.
    pub fn observe(&mut self, cid: Cid, parents: &[Cid]) {
        for parent in parents {
            self.supersede(*parent);
        }
        if !self.superseded.contains(&cid) {
            self.heads.insert(cid);
        }
        trace!(cid = %cid.short_hex(), heads = self.heads.len(), "observed event");
    }

    /// Apply a batch of decoded events (load or push notification).
    pub fn advance<'a>(&mut self, events: impl IntoIterator<Item = &'a EventBlock>) {
        for event in events {
            self.observe(event.cid(), event.parents());
        }
    }

    /// Collapse to the single event just written on top of the current heads.
    pub fn collapse_to(&mut self, cid: Cid) {
        for previous in std::mem::take(&mut self.heads) {
            self.supersede(previous);
        }
        self.heads.insert(cid);
    }

    fn supersede(&mut self, cid: Cid) {
        self.heads.remove(&cid);
        if !self.superseded.insert(cid) {
            return;
        }
        self.superseded_order.push_back(cid);
        while self.superseded_order.len() > self.limit {
            if let Some(oldest) = self.superseded_order.pop_front() {
                self.superseded.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_types::DbMeta;
    use proptest::prelude::*;

    fn cid(n: u8) -> Cid {
        Cid::from_bytes(&[n])
    }

    fn event(tag: u8, parents: &[Cid]) -> EventBlock {
        EventBlock::create(DbMeta::new(vec![cid(tag)]), parents.iter().copied()).unwrap()
    }

    // -----------------------------------------------------------------------
    // Observe / advance
    // -----------------------------------------------------------------------

    #[test]
    fn child_replaces_parent() {
        let mut heads = HeadSet::new();
        let a = event(1, &[]);
        let b = event(2, &[a.cid()]);
        heads.advance([&a, &b]);
        assert_eq!(heads.heads(), vec![b.cid()]);
    }

    #[test]
    fn late_parent_stays_out() {
        let mut heads = HeadSet::new();
        let a = event(1, &[]);
        let b = event(2, &[a.cid()]);
        heads.advance([&b]);
        heads.advance([&a]);
        assert_eq!(heads.heads(), vec![b.cid()]);
        assert!(heads.is_superseded(&a.cid()));
    }

    #[test]
    fn concurrent_events_are_both_heads() {
        let mut heads = HeadSet::new();
        let root = event(0, &[]);
        let left = event(1, &[root.cid()]);
        let right = event(2, &[root.cid()]);
        heads.advance([&root, &left, &right]);
        assert_eq!(heads.len(), 2);
        assert!(heads.contains(&left.cid()));
        assert!(heads.contains(&right.cid()));
    }

    #[test]
    fn reobserving_is_a_no_op() {
        let mut heads = HeadSet::new();
        let a = event(1, &[]);
        heads.advance([&a]);
        heads.advance([&a]);
        assert_eq!(heads.heads(), vec![a.cid()]);
    }

    #[test]
    fn untouched_heads_survive_a_batch() {
        let mut heads = HeadSet::new();
        let a = event(1, &[]);
        let b = event(2, &[]);
        heads.advance([&a]);
        heads.advance([&b]);
        assert_eq!(heads.len(), 2);
    }

    // -----------------------------------------------------------------------
    // Collapse
    // -----------------------------------------------------------------------

    #[test]
    fn collapse_supersedes_previous_heads() {
        let mut heads = HeadSet::new();
        let a = event(1, &[]);
        let b = event(2, &[]);
        heads.advance([&a, &b]);
        let merged = event(3, &heads.heads());
        heads.collapse_to(merged.cid());
        assert_eq!(heads.heads(), vec![merged.cid()]);

        // The old heads arriving again (e.g. echoed by a subscription) do
        // not come back.
        heads.advance([&a, &b]);
        assert_eq!(heads.heads(), vec![merged.cid()]);
    }

    #[test]
    fn superseded_memory_is_bounded() {
        let mut heads = HeadSet::with_superseded_limit(2);
        let a = event(1, &[]);
        let b = event(2, &[a.cid()]);
        let c = event(3, &[b.cid()]);
        let d = event(4, &[c.cid()]);
        heads.advance([&d, &c, &b]);
        assert_eq!(heads.heads(), vec![d.cid()]);
        assert!(heads.is_superseded(&b.cid()));
        assert!(heads.is_superseded(&a.cid()));
        assert!(!heads.is_superseded(&c.cid()));
    }

    // -----------------------------------------------------------------------
    // Convergence
    // -----------------------------------------------------------------------

    /// Builds a random DAG: event `i` picks parents among events `< i`.
    fn dag(edges: &[Vec<usize>]) -> Vec<EventBlock> {
        let mut events: Vec<EventBlock> = Vec::with_capacity(edges.len());
        for (i, parents) in edges.iter().enumerate() {
            let parent_cids: Vec<Cid> = parents
                .iter()
                .filter(|p| **p < i)
                .map(|p| events[*p].cid())
                .collect();
            events.push(event(i as u8, &parent_cids));
        }
        events
    }

    fn expected_heads(events: &[EventBlock]) -> Vec<Cid> {
        let parents: HashSet<Cid> = events
            .iter()
            .flat_map(|e| e.parents().iter().copied())
            .collect();
        let mut heads: Vec<Cid> = events
            .iter()
            .map(EventBlock::cid)
            .filter(|c| !parents.contains(c))
            .collect();
        heads.sort();
        heads.dedup();
        heads
    }

    proptest! {
        #[test]
        fn converges_regardless_of_arrival_order(
            edges in prop::collection::vec(prop::collection::vec(0usize..12, 0..3), 1..12),
            order in prop::collection::vec(any::<prop::sample::Index>(), 0..24),
        ) {
            let events = dag(&edges);

            let mut in_order = HeadSet::new();
            in_order.advance(events.iter());

            // Shuffled arrival, with repeats, followed by one full pass so
            // every event is seen at least once.
            let mut shuffled = HeadSet::new();
            for idx in &order {
                shuffled.advance([&events[idx.index(events.len())]]);
            }
            shuffled.advance(events.iter().rev());

            prop_assert_eq!(in_order.heads(), expected_heads(&events));
            prop_assert_eq!(shuffled.heads(), expected_heads(&events));
        }
    }
}
