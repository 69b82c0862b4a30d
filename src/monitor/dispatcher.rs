//! Event dispatcher: the single consumer that applies claim lifecycle events
//! to the snapshot store and the running total, then lets the threshold
//! monitor look at the before/after totals.
//!
//! The store and the aggregator live together in a [`ClaimLedger`] behind one
//! `RwLock`. The dispatcher is the only writer and holds the write lock for
//! exactly one event, so readers going through a [`LedgerView`] always see a
//! store and a total that agree with each other.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::core::errors::{PvcwError, Result};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::monitor::aggregator::{Aggregator, DeltaOutcome};
use crate::monitor::quantity::Quantity;
use crate::monitor::report::ClaimReport;
use crate::monitor::store::{Claim, ClaimKey, ClaimStore};
use crate::monitor::threshold::{ThresholdMonitor, Transition};

// ──────────────────── inbound records ────────────────────

/// A claim as delivered by a transport, before its capacity is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRecord {
    pub key: ClaimKey,
    /// Requested capacity in quantity notation (`"10Gi"`).
    pub capacity: String,
    pub phase: String,
    /// Opaque change marker (resource version).
    pub identity: String,
}

impl ClaimRecord {
    #[must_use]
    pub fn new(
        key: ClaimKey,
        capacity: impl Into<String>,
        phase: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            key,
            capacity: capacity.into(),
            phase: phase.into(),
            identity: identity.into(),
        }
    }

    /// Parse the capacity and build a stored claim.
    pub fn to_claim(&self) -> Result<Claim> {
        let capacity = Quantity::parse(&self.capacity)?;
        if capacity.is_negative() {
            return Err(PvcwError::invalid_quantity(
                &self.capacity,
                "claim capacity must not be negative",
            ));
        }
        Ok(Claim {
            key: self.key.clone(),
            capacity,
            phase: self.phase.clone(),
            identity: self.identity.clone(),
        })
    }
}

/// Lifecycle event consumed by the dispatcher.
#[derive(Debug)]
pub enum ClaimEvent {
    Added(ClaimRecord),
    Modified(ClaimRecord),
    Deleted(ClaimRecord),
    /// Authoritative full listing; the store is reconciled to it and the
    /// total re-derived from scratch.
    Sync(Vec<ClaimRecord>),
    /// Stream fault reported by the transport.
    Error(PvcwError),
}

impl ClaimEvent {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Modified(_) => "modified",
            Self::Deleted(_) => "deleted",
            Self::Sync(_) => "sync",
            Self::Error(_) => "error",
        }
    }
}

// ──────────────────── ledger ────────────────────

/// Snapshot store plus the running total derived from it.
#[derive(Debug, Default)]
pub struct ClaimLedger {
    store: ClaimStore,
    aggregator: Aggregator,
}

impl ClaimLedger {
    #[must_use]
    pub fn store(&self) -> &ClaimStore {
        &self.store
    }

    #[must_use]
    pub fn total(&self) -> Quantity {
        self.aggregator.total()
    }

    /// Whether the running total still equals the sum of stored capacities.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.store.derived_total() == self.aggregator.total()
    }
}

/// Cheap, cloneable read handle onto the dispatcher's ledger.
#[derive(Debug, Clone)]
pub struct LedgerView {
    ledger: Arc<RwLock<ClaimLedger>>,
    ceiling: Quantity,
}

impl LedgerView {
    /// Point-in-time copy for display. The read lock is held only for the copy.
    #[must_use]
    pub fn snapshot(&self) -> ClaimReport {
        let (claims, total) = {
            let ledger = self.ledger.read();
            (ledger.store.list(), ledger.total())
        };
        ClaimReport::new(claims, total, self.ceiling)
    }

    #[must_use]
    pub fn total(&self) -> Quantity {
        self.ledger.read().total()
    }

    #[must_use]
    pub fn claim_count(&self) -> usize {
        self.ledger.read().store.len()
    }

    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.ledger.read().is_consistent()
    }

    #[must_use]
    pub const fn ceiling(&self) -> Quantity {
        self.ceiling
    }
}

// ──────────────────── outcomes ────────────────────

/// What applying one event did.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The store changed.
    Applied {
        key: ClaimKey,
        delta: Quantity,
        total: Quantity,
        transition: Transition,
        inconsistency: Option<PvcwError>,
    },
    /// Duplicate delivery, unchanged resource version, or unknown key.
    Unchanged { key: ClaimKey },
    /// A full listing replaced the store contents.
    Resynced {
        claims: usize,
        rejected: usize,
        correction: Quantity,
        total: Quantity,
        transition: Transition,
    },
    /// Malformed record skipped without touching state.
    Rejected { key: ClaimKey, error: PvcwError },
    /// Transport fault; state untouched.
    Faulted { error: PvcwError },
}

impl DispatchOutcome {
    /// Whether the in-memory state can no longer be trusted without a relist.
    #[must_use]
    pub const fn needs_resync(&self) -> bool {
        matches!(
            self,
            Self::Faulted { .. }
                | Self::Applied {
                    inconsistency: Some(_),
                    ..
                }
        )
    }

    #[must_use]
    pub const fn transition(&self) -> Transition {
        match self {
            Self::Applied { transition, .. } | Self::Resynced { transition, .. } => *transition,
            _ => Transition::None,
        }
    }
}

/// Counters kept by the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub applied: u64,
    pub unchanged: u64,
    pub rejected: u64,
    pub resyncs: u64,
    pub faults: u64,
    pub inconsistencies: u64,
}

// ──────────────────── dispatcher ────────────────────

/// Applies claim events in order, one logical step per event.
pub struct EventDispatcher {
    ledger: Arc<RwLock<ClaimLedger>>,
    monitor: ThresholdMonitor,
    activity: Option<ActivityLoggerHandle>,
    stats: DispatchStats,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(monitor: ThresholdMonitor) -> Self {
        Self {
            ledger: Arc::new(RwLock::new(ClaimLedger::default())),
            monitor,
            activity: None,
            stats: DispatchStats::default(),
        }
    }

    /// Attach a log observer.
    #[must_use]
    pub fn with_activity(mut self, handle: ActivityLoggerHandle) -> Self {
        self.activity = Some(handle);
        self
    }

    #[must_use]
    pub fn view(&self) -> LedgerView {
        LedgerView {
            ledger: Arc::clone(&self.ledger),
            ceiling: self.monitor.ceiling(),
        }
    }

    #[must_use]
    pub fn total(&self) -> Quantity {
        self.ledger.read().total()
    }

    #[must_use]
    pub const fn stats(&self) -> DispatchStats {
        self.stats
    }

    #[must_use]
    pub const fn monitor(&self) -> &ThresholdMonitor {
        &self.monitor
    }

    /// Apply one event. Never fails: bad records and faults come back as
    /// outcomes so the watch loop keeps running.
    pub fn apply(&mut self, event: ClaimEvent) -> DispatchOutcome {
        match event {
            ClaimEvent::Added(record) => self.apply_upsert(&record, false),
            ClaimEvent::Modified(record) => self.apply_upsert(&record, true),
            ClaimEvent::Deleted(record) => self.apply_delete(record.key),
            ClaimEvent::Sync(records) => self.apply_sync(&records),
            ClaimEvent::Error(error) => {
                self.stats.faults += 1;
                self.log(ActivityEvent::TransportFault {
                    code: error.code().to_string(),
                    message: error.to_string(),
                });
                DispatchOutcome::Faulted { error }
            }
        }
    }

    fn apply_upsert(&mut self, record: &ClaimRecord, modified: bool) -> DispatchOutcome {
        let claim = match record.to_claim() {
            Ok(claim) => claim,
            Err(error) => return self.reject(record.key.clone(), error),
        };
        let key = claim.key.clone();
        let capacity = claim.capacity;

        let step = {
            let mut ledger = self.ledger.write();
            let stored = ledger.store.get(&key);
            // An empty resource version says nothing about the object, so
            // only a real marker can mark a repeat.
            let same_version = modified
                && !claim.identity.is_empty()
                && stored.is_some_and(|c| c.identity == claim.identity);
            let changed = stored.is_none_or(|c| c.differs_materially(&claim));
            if same_version {
                None
            } else if !changed {
                ledger.store.upsert(claim);
                None
            } else {
                let previous = ledger.store.upsert(claim);
                let delta = previous.map_or(capacity, |prev| capacity - prev);
                Some((previous, delta, ledger.aggregator.apply_delta(delta)))
            }
        };

        let Some((previous, delta, outcome)) = step else {
            self.stats.unchanged += 1;
            return DispatchOutcome::Unchanged { key };
        };

        self.stats.applied += 1;
        let ceiling = self.monitor.ceiling();
        self.log(match previous {
            None => ActivityEvent::ClaimAdded {
                claim: key.to_string(),
                capacity,
                total: outcome.total,
                ceiling,
            },
            Some(previous) => ActivityEvent::ClaimModified {
                claim: key.to_string(),
                previous,
                capacity,
                total: outcome.total,
                ceiling,
            },
        });
        self.finish_delta(key, delta, outcome)
    }

    fn apply_delete(&mut self, key: ClaimKey) -> DispatchOutcome {
        let step = {
            let mut ledger = self.ledger.write();
            match ledger.store.remove(&key) {
                Some(capacity) => Some((capacity, ledger.aggregator.subtract(capacity))),
                None => None,
            }
        };

        let Some((capacity, outcome)) = step else {
            self.stats.unchanged += 1;
            return DispatchOutcome::Unchanged { key };
        };

        self.stats.applied += 1;
        self.log(ActivityEvent::ClaimDeleted {
            claim: key.to_string(),
            capacity,
            total: outcome.total,
            ceiling: self.monitor.ceiling(),
        });
        self.finish_delta(key, -capacity, outcome)
    }

    fn apply_sync(&mut self, records: &[ClaimRecord]) -> DispatchOutcome {
        let listed: BTreeSet<ClaimKey> = records.iter().map(|r| r.key.clone()).collect();
        let mut claims = Vec::with_capacity(records.len());
        let mut rejected = 0;
        for record in records {
            match record.to_claim() {
                Ok(claim) => claims.push(claim),
                Err(error) => {
                    rejected += 1;
                    self.reject(record.key.clone(), error);
                }
            }
        }

        // Malformed records keep whatever was stored for their key; only keys
        // missing from the listing are dropped.
        let (outcome, count) = {
            let mut guard = self.ledger.write();
            let ledger = &mut *guard;
            let stale: Vec<ClaimKey> = ledger
                .store
                .keys()
                .filter(|key| !listed.contains(*key))
                .cloned()
                .collect();
            for key in &stale {
                ledger.store.remove(key);
            }
            for claim in claims {
                ledger.store.upsert(claim);
            }
            let outcome = ledger
                .aggregator
                .rebase(ledger.store.iter().map(|claim| &claim.capacity));
            (outcome, ledger.store.len())
        };

        self.stats.resyncs += 1;
        let correction = outcome.total - outcome.previous;
        self.log(ActivityEvent::Resynced {
            claims: count,
            previous_total: outcome.previous,
            total: outcome.total,
            ceiling: self.monitor.ceiling(),
        });
        let transition = self.observe(&outcome);
        DispatchOutcome::Resynced {
            claims: count,
            rejected,
            correction,
            total: outcome.total,
            transition,
        }
    }

    fn finish_delta(&mut self, key: ClaimKey, delta: Quantity, outcome: DeltaOutcome) -> DispatchOutcome {
        let inconsistency = outcome.clamped.map(|shortfall| {
            self.stats.inconsistencies += 1;
            let error = PvcwError::InconsistentDelta {
                key: key.to_string(),
                details: format!(
                    "total would drop {shortfall} below zero; clamped (was {})",
                    outcome.previous
                ),
            };
            self.log(ActivityEvent::Inconsistency {
                claim: key.to_string(),
                message: error.to_string(),
            });
            error
        });
        let transition = self.observe(&outcome);
        DispatchOutcome::Applied {
            key,
            delta,
            total: outcome.total,
            transition,
            inconsistency,
        }
    }

    /// Run the threshold monitor on a total update; the action fires inside.
    fn observe(&mut self, outcome: &DeltaOutcome) -> Transition {
        let transition = self.monitor.observe(&outcome.previous, &outcome.total);
        if transition.is_crossing() {
            self.log(ActivityEvent::ThresholdCrossed {
                transition,
                total: outcome.total,
                ceiling: self.monitor.ceiling(),
            });
        }
        transition
    }

    fn reject(&mut self, key: ClaimKey, error: PvcwError) -> DispatchOutcome {
        self.stats.rejected += 1;
        self.log(ActivityEvent::ClaimRejected {
            claim: key.to_string(),
            code: error.code().to_string(),
            message: error.to_string(),
        });
        DispatchOutcome::Rejected { key, error }
    }

    fn log(&self, event: ActivityEvent) {
        if let Some(handle) = &self.activity {
            handle.send(event);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("monitor", &self.monitor)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::monitor::threshold::{NoAction, ThresholdAlert};

    fn q(s: &str) -> Quantity {
        Quantity::parse(s).unwrap()
    }

    fn record(name: &str, capacity: &str, identity: &str) -> ClaimRecord {
        ClaimRecord::new(ClaimKey::new("default", name), capacity, "Bound", identity)
    }

    fn dispatcher(ceiling: &str) -> (EventDispatcher, Arc<Mutex<Vec<ThresholdAlert>>>) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        let monitor = ThresholdMonitor::new(
            q(ceiling),
            Box::new(move |alert: &ThresholdAlert| sink.lock().push(alert.clone())),
        );
        (EventDispatcher::new(monitor), fired)
    }

    #[test]
    fn added_then_deleted_tracks_total() {
        let (mut d, _) = dispatcher("1Ti");
        d.apply(ClaimEvent::Added(record("a", "10Gi", "1")));
        d.apply(ClaimEvent::Added(record("b", "5Gi", "1")));
        assert_eq!(d.total(), q("15Gi"));
        d.apply(ClaimEvent::Deleted(record("a", "10Gi", "2")));
        assert_eq!(d.total(), q("5Gi"));
        assert!(d.view().is_consistent());
    }

    #[test]
    fn duplicate_added_is_not_double_counted() {
        let (mut d, _) = dispatcher("1Ti");
        d.apply(ClaimEvent::Added(record("a", "10Gi", "1")));
        let outcome = d.apply(ClaimEvent::Added(record("a", "10Gi", "1")));
        assert!(matches!(outcome, DispatchOutcome::Unchanged { .. }));
        assert_eq!(d.total(), q("10Gi"));
    }

    #[test]
    fn added_for_known_key_applies_difference() {
        let (mut d, _) = dispatcher("1Ti");
        d.apply(ClaimEvent::Added(record("a", "10Gi", "1")));
        let outcome = d.apply(ClaimEvent::Added(record("a", "12Gi", "2")));
        match outcome {
            DispatchOutcome::Applied { delta, total, .. } => {
                assert_eq!(delta, q("2Gi"));
                assert_eq!(total, q("12Gi"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn modified_with_same_version_is_skipped() {
        let (mut d, _) = dispatcher("1Ti");
        d.apply(ClaimEvent::Added(record("a", "10Gi", "7")));
        let outcome = d.apply(ClaimEvent::Modified(record("a", "20Gi", "7")));
        assert!(matches!(outcome, DispatchOutcome::Unchanged { .. }));
        assert_eq!(d.total(), q("10Gi"));
    }

    #[test]
    fn modified_without_version_still_applies_capacity() {
        let (mut d, _) = dispatcher("1Ti");
        d.apply(ClaimEvent::Added(record("a", "10Gi", "")));
        let outcome = d.apply(ClaimEvent::Modified(record("a", "20Gi", "")));
        assert!(matches!(outcome, DispatchOutcome::Applied { .. }), "{outcome:?}");
        assert_eq!(d.total(), q("20Gi"));

        let repeat = d.apply(ClaimEvent::Modified(record("a", "20Gi", "")));
        assert!(matches!(repeat, DispatchOutcome::Unchanged { .. }));
        assert_eq!(d.total(), q("20Gi"));
        assert!(d.view().is_consistent());
    }

    #[test]
    fn modified_with_new_version_applies_delta() {
        let (mut d, _) = dispatcher("1Ti");
        d.apply(ClaimEvent::Added(record("a", "10Gi", "7")));
        d.apply(ClaimEvent::Modified(record("a", "4Gi", "8")));
        assert_eq!(d.total(), q("4Gi"));
        assert_eq!(d.stats().applied, 2);
    }

    #[test]
    fn modified_for_unknown_key_inserts() {
        let (mut d, _) = dispatcher("1Ti");
        d.apply(ClaimEvent::Modified(record("late", "3Gi", "9")));
        assert_eq!(d.total(), q("3Gi"));
    }

    #[test]
    fn deleting_unknown_key_is_noop() {
        let (mut d, fired) = dispatcher("1Ti");
        d.apply(ClaimEvent::Added(record("a", "10Gi", "1")));
        let outcome = d.apply(ClaimEvent::Deleted(record("ghost", "99Gi", "1")));
        assert!(matches!(outcome, DispatchOutcome::Unchanged { .. }));
        assert_eq!(d.total(), q("10Gi"));
        assert!(fired.lock().is_empty());
    }

    #[test]
    fn malformed_capacity_is_rejected_without_state_change() {
        let (mut d, _) = dispatcher("1Ti");
        d.apply(ClaimEvent::Added(record("a", "10Gi", "1")));
        let outcome = d.apply(ClaimEvent::Added(record("bad", "ten gigs", "1")));
        match outcome {
            DispatchOutcome::Rejected { key, error } => {
                assert_eq!(key.name, "bad");
                assert_eq!(error.code(), "PVCW-2001");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let outcome = d.apply(ClaimEvent::Added(record("neg", "-1Gi", "1")));
        assert!(matches!(outcome, DispatchOutcome::Rejected { .. }));
        assert_eq!(d.total(), q("10Gi"));
        assert_eq!(d.stats().rejected, 2);
    }

    #[test]
    fn sync_reconciles_store_and_total() {
        let (mut d, _) = dispatcher("1Ti");
        d.apply(ClaimEvent::Added(record("a", "10Gi", "1")));
        d.apply(ClaimEvent::Added(record("gone", "50Gi", "1")));
        let outcome = d.apply(ClaimEvent::Sync(vec![
            record("a", "10Gi", "1"),
            record("missed", "7Gi", "3"),
        ]));
        match outcome {
            DispatchOutcome::Resynced {
                claims,
                correction,
                total,
                ..
            } => {
                assert_eq!(claims, 2);
                assert_eq!(total, q("17Gi"));
                assert_eq!(correction, -q("43Gi"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let report = d.view().snapshot();
        let names: Vec<&str> = report.claims.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["a", "missed"]);
    }

    #[test]
    fn sync_keeps_previous_value_for_malformed_record() {
        let (mut d, _) = dispatcher("1Ti");
        d.apply(ClaimEvent::Added(record("a", "10Gi", "1")));
        let outcome = d.apply(ClaimEvent::Sync(vec![record("a", "garbage", "2")]));
        assert!(matches!(outcome, DispatchOutcome::Resynced { rejected: 1, .. }));
        assert_eq!(d.total(), q("10Gi"));
    }

    #[test]
    fn baseline_then_live_added_does_not_double_count() {
        let (mut d, _) = dispatcher("1Ti");
        d.apply(ClaimEvent::Sync(vec![record("A", "10", "5")]));
        d.apply(ClaimEvent::Added(record("A", "10", "5")));
        assert_eq!(d.total(), q("10"));
    }

    #[test]
    fn error_event_leaves_state_and_requests_resync() {
        let (mut d, _) = dispatcher("1Ti");
        d.apply(ClaimEvent::Added(record("a", "10Gi", "1")));
        let outcome = d.apply(ClaimEvent::Error(PvcwError::transport("test", "stream reset")));
        assert!(outcome.needs_resync());
        assert_eq!(d.total(), q("10Gi"));
        assert_eq!(d.stats().faults, 1);
    }

    #[test]
    fn threshold_fires_on_crossings_only() {
        let (mut d, fired) = dispatcher("200Gi");
        d.apply(ClaimEvent::Added(record("A", "100Gi", "1")));
        let outcome = d.apply(ClaimEvent::Added(record("B", "150Gi", "1")));
        assert_eq!(outcome.transition(), Transition::RoseAboveCeiling);
        d.apply(ClaimEvent::Added(record("C", "1Gi", "1")));
        d.apply(ClaimEvent::Deleted(record("C", "1Gi", "2")));
        let outcome = d.apply(ClaimEvent::Deleted(record("A", "100Gi", "2")));
        assert_eq!(outcome.transition(), Transition::FellToOrBelowCeiling);

        let fired = fired.lock();
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].current_total.to_string(), "250Gi");
        assert_eq!(fired[1].current_total.to_string(), "150Gi");
    }

    #[test]
    fn view_snapshot_reports_ceiling_and_total() {
        let monitor = ThresholdMonitor::new(q("200Gi"), Box::new(NoAction));
        let mut d = EventDispatcher::new(monitor);
        let view = d.view();
        d.apply(ClaimEvent::Added(record("a", "50Gi", "1")));
        let report = view.snapshot();
        assert_eq!(report.total, q("50Gi"));
        assert_eq!(report.ceiling, q("200Gi"));
        assert_eq!(view.claim_count(), 1);
    }
}
