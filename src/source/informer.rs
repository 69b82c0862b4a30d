//! Cache-backed adapter.
//!
//! Keeps the last seen record per claim. Notifications whose resource
//! version matches the cache are dropped (a watch replaying objects already
//! listed, or an update that changed nothing), and every resync interval the
//! whole cache goes to the dispatcher as one `Sync`.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::monitor::dispatcher::{ClaimEvent, ClaimRecord};
use crate::monitor::store::ClaimKey;
use crate::source::WatchRecord;
use crate::source::feed::ClaimFeed;

#[derive(Debug, Clone)]
pub struct InformerAdapter {
    cache: BTreeMap<ClaimKey, ClaimRecord>,
    resync_interval: Duration,
}

impl InformerAdapter {
    #[must_use]
    pub const fn new(resync_interval: Duration) -> Self {
        Self {
            cache: BTreeMap::new(),
            resync_interval,
        }
    }

    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn snapshot(&self) -> Vec<ClaimRecord> {
        self.cache.values().cloned().collect()
    }

    fn is_stale_repeat(&self, record: &ClaimRecord) -> bool {
        !record.identity.is_empty()
            && self
                .cache
                .get(&record.key)
                .is_some_and(|cached| cached.identity == record.identity)
    }
}

impl ClaimFeed for InformerAdapter {
    fn name(&self) -> &'static str {
        "informer"
    }

    fn on_listing(&mut self, records: Vec<ClaimRecord>) -> Vec<ClaimRecord> {
        self.cache = records
            .into_iter()
            .map(|record| (record.key.clone(), record))
            .collect();
        self.snapshot()
    }

    fn on_record(&mut self, record: WatchRecord) -> Option<ClaimEvent> {
        match record {
            WatchRecord::Added(r) | WatchRecord::Modified(r) if self.is_stale_repeat(&r) => None,
            WatchRecord::Added(r) => {
                self.cache.insert(r.key.clone(), r.clone());
                Some(ClaimEvent::Added(r))
            }
            WatchRecord::Modified(r) => {
                self.cache.insert(r.key.clone(), r.clone());
                Some(ClaimEvent::Modified(r))
            }
            WatchRecord::Deleted(r) => {
                self.cache.remove(&r.key);
                Some(ClaimEvent::Deleted(r))
            }
            WatchRecord::Bookmark(_) | WatchRecord::Error(_) => None,
        }
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(self.resync_interval)
    }

    fn on_tick(&mut self) -> Option<ClaimEvent> {
        Some(ClaimEvent::Sync(self.snapshot()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, capacity: &str, identity: &str) -> ClaimRecord {
        ClaimRecord::new(ClaimKey::new("ns", name), capacity, "Bound", identity)
    }

    #[test]
    fn listing_replaces_cache() {
        let mut adapter = InformerAdapter::new(Duration::from_secs(3));
        adapter.on_listing(vec![record("a", "1Gi", "1"), record("b", "2Gi", "2")]);
        assert_eq!(adapter.cached(), 2);
        let out = adapter.on_listing(vec![record("c", "3Gi", "3")]);
        assert_eq!(out, vec![record("c", "3Gi", "3")]);
        assert_eq!(adapter.cached(), 1);
    }

    #[test]
    fn same_version_updates_are_suppressed() {
        let mut adapter = InformerAdapter::new(Duration::from_secs(3));
        adapter.on_listing(vec![record("a", "1Gi", "1")]);
        assert!(adapter.on_record(WatchRecord::Added(record("a", "1Gi", "1"))).is_none());
        assert!(adapter.on_record(WatchRecord::Modified(record("a", "1Gi", "1"))).is_none());
        assert!(matches!(
            adapter.on_record(WatchRecord::Modified(record("a", "5Gi", "2"))),
            Some(ClaimEvent::Modified(r)) if r.capacity == "5Gi"
        ));
    }

    #[test]
    fn empty_versions_are_never_suppressed() {
        let mut adapter = InformerAdapter::new(Duration::from_secs(3));
        adapter.on_listing(vec![record("a", "1Gi", "")]);
        assert!(adapter.on_record(WatchRecord::Modified(record("a", "1Gi", ""))).is_some());
    }

    #[test]
    fn tick_emits_cache_as_sync() {
        let mut adapter = InformerAdapter::new(Duration::from_millis(3_000));
        adapter.on_listing(vec![record("a", "1Gi", "1")]);
        adapter.on_record(WatchRecord::Added(record("b", "2Gi", "4")));
        adapter.on_record(WatchRecord::Deleted(record("a", "1Gi", "5")));
        assert_eq!(adapter.tick_interval(), Some(Duration::from_millis(3_000)));
        match adapter.on_tick() {
            Some(ClaimEvent::Sync(records)) => assert_eq!(records, vec![record("b", "2Gi", "4")]),
            other => panic!("expected sync, got {other:?}"),
        }
    }
}
