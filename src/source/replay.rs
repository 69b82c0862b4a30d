//! Claim source backed by recorded kubectl output.
//!
//! The list file holds one `kubectl get pvc -o json` document; the optional
//! events file holds the stdout of `kubectl get pvc --watch
//! --output-watch-events -o json`. The first watch replays the recorded
//! events; later watches are empty.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::core::errors::{PvcwError, Result};
use crate::monitor::dispatcher::ClaimRecord;
use crate::source::wire::{decode_watch_stream, parse_list};
use crate::source::{ClaimListing, ClaimSource, WatchRecord, WatchStream};

#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    listing: ClaimListing,
    events: Option<Vec<WatchRecord>>,
    event_delay: Duration,
}

impl ReplaySource {
    /// Build a replay from in-memory records.
    #[must_use]
    pub fn new(records: Vec<ClaimRecord>, events: Vec<WatchRecord>) -> Self {
        Self {
            listing: ClaimListing {
                records,
                resource_version: None,
            },
            events: Some(events),
            event_delay: Duration::ZERO,
        }
    }

    /// Parse recorded list and watch output.
    pub fn from_json(list: &str, events: Option<&str>) -> Result<Self> {
        let listing = parse_list(list)?;
        let events = match events {
            Some(raw) => decode_watch_stream(raw.as_bytes()).collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        Ok(Self {
            listing,
            events: Some(events),
            event_delay: Duration::ZERO,
        })
    }

    /// Read recorded list and watch output from disk.
    pub fn from_files(list_path: &Path, events_path: Option<&Path>) -> Result<Self> {
        let list = read(list_path)?;
        let events = events_path.map(read).transpose()?;
        Self::from_json(&list, events.as_deref())
    }

    /// Pause between replayed events, to mimic a live stream.
    #[must_use]
    pub const fn with_event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = delay;
        self
    }

    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.events.as_ref().map_or(0, Vec::len)
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| PvcwError::io(path, source))
}

impl ClaimSource for ReplaySource {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn list(&mut self) -> Result<ClaimListing> {
        Ok(self.listing.clone())
    }

    fn watch(&mut self, _resource_version: Option<&str>) -> Result<WatchStream> {
        let events = self.events.take().unwrap_or_default();
        let delay = self.event_delay;
        Ok(WatchStream::new(events.into_iter().map(move |record| {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            Ok(record)
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::store::ClaimKey;

    const LIST: &str = r#"{
        "kind": "List",
        "metadata": {"resourceVersion": ""},
        "items": [
            {"metadata": {"name": "a", "namespace": "ns", "resourceVersion": "1"},
             "spec": {"resources": {"requests": {"storage": "1Gi"}}},
             "status": {"phase": "Bound"}}
        ]
    }"#;

    const EVENTS: &str = r#"
{"type": "ADDED", "object": {"metadata": {"name": "b", "namespace": "ns", "resourceVersion": "2"}, "spec": {"resources": {"requests": {"storage": "2Gi"}}}}}
{"type": "DELETED", "object": {"metadata": {"name": "a", "namespace": "ns", "resourceVersion": "3"}, "spec": {"resources": {"requests": {"storage": "1Gi"}}}}}
"#;

    #[test]
    fn replays_listing_and_events_once() {
        let mut source = ReplaySource::from_json(LIST, Some(EVENTS)).unwrap();
        assert_eq!(source.pending_events(), 2);

        let listing = source.list().unwrap();
        assert_eq!(listing.records.len(), 1);
        assert_eq!(listing.records[0].key, ClaimKey::new("ns", "a"));

        let first: Vec<_> = source.watch(None).unwrap().collect();
        assert_eq!(first.len(), 2);
        assert!(matches!(&first[0], Ok(WatchRecord::Added(r)) if r.capacity == "2Gi" && r.phase == "Pending"));
        assert!(matches!(&first[1], Ok(WatchRecord::Deleted(_))));

        assert_eq!(source.watch(None).unwrap().count(), 0);
        assert_eq!(source.list().unwrap().records.len(), 1);
    }

    #[test]
    fn bad_events_fail_at_load() {
        let err = ReplaySource::from_json(LIST, Some("{\"type\": \"ADDED\", \"object\": ")).unwrap_err();
        assert_eq!(err.code(), "PVCW-3001");
    }

    #[test]
    fn reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let list_path = dir.path().join("list.json");
        let events_path = dir.path().join("events.json");
        fs::write(&list_path, LIST).unwrap();
        fs::write(&events_path, EVENTS).unwrap();

        let mut source = ReplaySource::from_files(&list_path, Some(&events_path)).unwrap();
        assert_eq!(source.list().unwrap().records.len(), 1);
        assert_eq!(source.pending_events(), 2);

        let missing = ReplaySource::from_files(&dir.path().join("nope.json"), None).unwrap_err();
        assert_eq!(missing.code(), "PVCW-3002");
    }
}
