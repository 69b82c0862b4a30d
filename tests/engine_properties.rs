//! Property-based tests for the claim accounting engine.
//!
//! Arbitrary lifecycle sequences must keep the running total equal to the
//! sum of stored capacities, fire the threshold action exactly on edges,
//! and converge to the same state when a listing is applied twice.

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;

use pvc_watch::monitor::dispatcher::{ClaimEvent, ClaimRecord, DispatchOutcome, EventDispatcher};
use pvc_watch::monitor::quantity::Quantity;
use pvc_watch::monitor::store::ClaimKey;
use pvc_watch::monitor::threshold::{ThresholdAlert, ThresholdMonitor, Transition};

// ──────────────────── strategies ────────────────────

static SUFFIXES: [&str; 9] = ["", "m", "k", "M", "G", "Ki", "Mi", "Gi", "Ti"];
static UNITS: [&str; 4] = ["Mi", "Gi", "G", "M"];

fn arb_capacity() -> impl Strategy<Value = String> {
    (0u32..5_000, prop::sample::select(&UNITS[..]))
        .prop_map(|(n, suffix)| format!("{n}{suffix}"))
}

fn arb_record() -> impl Strategy<Value = ClaimRecord> {
    (0u8..6, arb_capacity(), 0u32..1_000).prop_map(|(slot, capacity, version)| {
        ClaimRecord::new(
            ClaimKey::new("ns", format!("claim-{slot}")),
            capacity,
            "Bound",
            version.to_string(),
        )
    })
}

fn arb_event() -> impl Strategy<Value = ClaimEvent> {
    prop_oneof![
        4 => arb_record().prop_map(ClaimEvent::Added),
        3 => arb_record().prop_map(ClaimEvent::Modified),
        2 => arb_record().prop_map(ClaimEvent::Deleted),
        1 => prop::collection::vec(arb_record(), 0..6).prop_map(ClaimEvent::Sync),
    ]
}

fn dispatcher(ceiling: &str) -> (EventDispatcher, Arc<Mutex<Vec<ThresholdAlert>>>) {
    let alerts = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&alerts);
    let monitor = ThresholdMonitor::new(
        Quantity::parse(ceiling).unwrap(),
        Box::new(move |alert: &ThresholdAlert| sink.lock().push(alert.clone())),
    );
    (EventDispatcher::new(monitor), alerts)
}

fn stored_sum_milli(dispatcher: &EventDispatcher) -> i128 {
    dispatcher
        .view()
        .snapshot()
        .claims
        .iter()
        .map(|row| row.capacity.milli_value())
        .sum()
}

// ──────────────────── property tests ────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// The running total always equals the sum of what the store holds.
    #[test]
    fn total_matches_store_after_every_event(
        events in prop::collection::vec(arb_event(), 1..60)
    ) {
        let (mut dispatcher, _) = dispatcher("10Gi");
        for event in events {
            let _ = dispatcher.apply(event);
            prop_assert!(dispatcher.view().is_consistent());
            prop_assert_eq!(dispatcher.total().milli_value(), stored_sum_milli(&dispatcher));
            prop_assert!(!dispatcher.total().is_negative());
        }
    }

    /// Exactly one action per crossing, alternating direction.
    #[test]
    fn action_fires_only_on_edges(
        events in prop::collection::vec(arb_event(), 1..60)
    ) {
        let (mut dispatcher, alerts) = dispatcher("5Gi");
        let ceiling = Quantity::parse("5Gi").unwrap();
        let mut over = false;
        let mut expected = Vec::new();
        for event in events {
            let _ = dispatcher.apply(event);
            let now_over = dispatcher.total() > ceiling;
            if now_over != over {
                expected.push(if now_over {
                    Transition::RoseAboveCeiling
                } else {
                    Transition::FellToOrBelowCeiling
                });
                over = now_over;
            }
        }
        let fired: Vec<Transition> = alerts.lock().iter().map(|a| a.transition).collect();
        prop_assert_eq!(fired, expected);
        prop_assert_eq!(dispatcher.monitor().is_over(), over);
    }

    /// Applying a listing twice leaves nothing to correct the second time.
    #[test]
    fn sync_is_idempotent(
        prior in prop::collection::vec(arb_event(), 0..20),
        listing in prop::collection::vec(arb_record(), 0..8)
    ) {
        let (mut dispatcher, _) = dispatcher("1Ti");
        for event in prior {
            let _ = dispatcher.apply(event);
        }
        let _ = dispatcher.apply(ClaimEvent::Sync(listing.clone()));
        let first = dispatcher.total();
        let outcome = dispatcher.apply(ClaimEvent::Sync(listing));
        match outcome {
            DispatchOutcome::Resynced { correction, total, transition, .. } => {
                prop_assert!(correction.is_zero());
                prop_assert_eq!(total, first);
                prop_assert_eq!(transition, Transition::None);
            }
            other => prop_assert!(false, "expected resync, got {:?}", other),
        }
    }

    /// Rendering and re-parsing keeps the exact value.
    #[test]
    fn quantity_display_round_trips(
        n in 0u64..1_000_000,
        suffix in prop::sample::select(&SUFFIXES[..])
    ) {
        let original = Quantity::parse(&format!("{n}{suffix}")).unwrap();
        let reparsed = Quantity::parse(&original.to_string()).unwrap();
        prop_assert_eq!(reparsed.milli_value(), original.milli_value());
    }
}
