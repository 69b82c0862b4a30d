//! End-to-end runs of the watch daemon over in-process claim sources.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use pvc_watch::core::config::{Config, WatchMode};
use pvc_watch::core::errors::{PvcwError, Result};
use pvc_watch::daemon::loop_main::{DaemonArgs, RunSummary, StopReason, WatchDaemon};
use pvc_watch::monitor::dispatcher::ClaimRecord;
use pvc_watch::monitor::store::ClaimKey;
use pvc_watch::monitor::threshold::{ThresholdAlert, Transition};
use pvc_watch::source::replay::ReplaySource;
use pvc_watch::source::{ClaimListing, ClaimSource, WatchRecord, WatchStream};

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuffer {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

fn record(namespace: &str, name: &str, capacity: &str, identity: &str) -> ClaimRecord {
    ClaimRecord::new(ClaimKey::new(namespace, name), capacity, "Bound", identity)
}

fn quiet_config(max_claims: &str) -> Config {
    let mut config = Config::default();
    config.threshold.max_claims = max_claims.to_string();
    config.logging.stderr = false;
    config.logging.jsonl_enabled = false;
    config.notifications.enabled = false;
    config.report.initial = false;
    config.watch.reconnect = false;
    config.watch.backoff_initial_ms = 1;
    config.watch.backoff_max_ms = 5;
    config
}

struct Harness {
    daemon: WatchDaemon,
    reports: SharedBuffer,
    alerts: Arc<Mutex<Vec<ThresholdAlert>>>,
}

impl Harness {
    fn new(config: Config, source: Box<dyn ClaimSource>) -> Self {
        let reports = SharedBuffer::default();
        let alerts = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&alerts);
        let daemon = WatchDaemon::init(config, source, &DaemonArgs::default())
            .expect("daemon init")
            .with_report_sink(Arc::new(Mutex::new(Box::new(reports.clone()))))
            .with_action(Box::new(move |alert: &ThresholdAlert| {
                sink.lock().push(alert.clone());
            }));
        Self {
            daemon,
            reports,
            alerts,
        }
    }

    fn run(&mut self) -> RunSummary {
        self.daemon.run().expect("daemon run")
    }

    fn transitions(&self) -> Vec<Transition> {
        self.alerts.lock().iter().map(|a| a.transition).collect()
    }
}

fn scenario() -> ReplaySource {
    ReplaySource::new(
        vec![
            record("apps", "data-0", "100Gi", "101"),
            record("apps", "logs", "50Gi", "102"),
        ],
        vec![
            // A fresh watch replays what the listing already had.
            WatchRecord::Added(record("apps", "data-0", "100Gi", "101")),
            WatchRecord::Added(record("apps", "backup", "60Gi", "201")),
            WatchRecord::Bookmark("202".to_string()),
            WatchRecord::Modified(record("apps", "logs", "20Gi", "203")),
            WatchRecord::Deleted(record("apps", "data-0", "100Gi", "204")),
        ],
    )
}

#[test]
fn raw_feed_fires_once_per_crossing() {
    let mut harness = Harness::new(quiet_config("200Gi"), Box::new(scenario()));
    let summary = harness.run();

    assert_eq!(summary.stop_reason, StopReason::FeedClosed);
    assert_eq!(summary.final_total.to_string(), "80Gi");
    assert_eq!(summary.claims, 2);
    assert_eq!(summary.events_applied, 3);
    assert_eq!(summary.events_unchanged, 1);
    assert_eq!(summary.faults, 0);
    assert_eq!(
        harness.transitions(),
        vec![Transition::RoseAboveCeiling, Transition::FellToOrBelowCeiling]
    );
    let alerts = harness.alerts.lock();
    assert_eq!(alerts[0].current_total.to_string(), "210Gi");
    assert_eq!(alerts[1].current_total.to_string(), "180Gi");
}

#[test]
fn informer_feed_matches_raw_totals() {
    let mut config = quiet_config("200Gi");
    config.watch.mode = WatchMode::Informer;
    let mut harness = Harness::new(config, Box::new(scenario()));
    let summary = harness.run();

    assert_eq!(summary.final_total.to_string(), "80Gi");
    assert_eq!(summary.events_applied, 3);
    assert_eq!(summary.events_unchanged, 0);
    assert_eq!(summary.transitions, 2);
}

#[test]
fn baseline_above_ceiling_fires_at_startup() {
    let source = ReplaySource::new(
        vec![record("ns", "big", "300Gi", "1")],
        vec![WatchRecord::Modified(record("ns", "big", "310Gi", "2"))],
    );
    let mut harness = Harness::new(quiet_config("200Gi"), Box::new(source));
    let summary = harness.run();

    assert!(summary.over_ceiling);
    // Growing further while already over is not a new crossing.
    assert_eq!(harness.transitions(), vec![Transition::RoseAboveCeiling]);
    assert_eq!(summary.final_total.to_string(), "310Gi");
}

#[test]
fn total_equal_to_ceiling_is_not_over() {
    let source = ReplaySource::new(
        vec![record("ns", "a", "100Gi", "1")],
        vec![WatchRecord::Added(record("ns", "b", "100Gi", "2"))],
    );
    let mut harness = Harness::new(quiet_config("200Gi"), Box::new(source));
    let summary = harness.run();

    assert_eq!(summary.final_total.to_string(), "200Gi");
    assert!(!summary.over_ceiling);
    assert!(harness.transitions().is_empty());
}

#[test]
fn malformed_claims_are_skipped() {
    let source = ReplaySource::new(
        vec![
            record("ns", "a", "1Gi", "1"),
            record("ns", "broken", "ten gigs", "2"),
        ],
        vec![
            WatchRecord::Added(record("ns", "b", "-4Gi", "3")),
            WatchRecord::Added(record("ns", "c", "2Gi", "4")),
        ],
    );
    let mut harness = Harness::new(quiet_config("10Gi"), Box::new(source));
    let summary = harness.run();

    assert_eq!(summary.events_rejected, 2);
    assert_eq!(summary.events_applied, 1);
    assert_eq!(summary.claims, 2);
    assert_eq!(summary.final_total.to_string(), "3Gi");
}

#[test]
fn deleting_unknown_claim_changes_nothing() {
    let source = ReplaySource::new(
        vec![record("ns", "a", "1Gi", "1")],
        vec![WatchRecord::Deleted(record("ns", "ghost", "5Gi", "2"))],
    );
    let mut harness = Harness::new(quiet_config("10Gi"), Box::new(source));
    let summary = harness.run();

    assert_eq!(summary.events_unchanged, 1);
    assert_eq!(summary.inconsistencies, 0);
    assert_eq!(summary.final_total.to_string(), "1Gi");
}

#[test]
fn initial_and_periodic_reports() {
    let mut config = quiet_config("200Gi");
    config.report.initial = true;
    config.report.interval_secs = 1;
    let source = ReplaySource::new(
        vec![record("ns", "a", "50Gi", "1")],
        vec![
            WatchRecord::Added(record("ns", "b", "50Gi", "2")),
            WatchRecord::Added(record("ns", "c", "50Gi", "3")),
            WatchRecord::Added(record("ns", "d", "50Gi", "4")),
        ],
    )
    .with_event_delay(Duration::from_millis(600));
    let mut harness = Harness::new(config, Box::new(source));
    harness.run();

    let text = harness.reports.text();
    assert!(
        text.matches("--- PVCs ----").count() >= 2,
        "expected initial and periodic tables: {text}"
    );
    assert!(text.contains("At 25.0% claim capacity (50Gi/200Gi)"), "{text}");
}

/// Lists succeed; the first watch faults, every later watch is empty.
struct FlakySource {
    lists: Arc<AtomicUsize>,
    watches: Arc<AtomicUsize>,
}

impl ClaimSource for FlakySource {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn list(&mut self) -> Result<ClaimListing> {
        let n = self.lists.fetch_add(1, Ordering::SeqCst);
        let capacity = if n == 0 { "1Gi" } else { "3Gi" };
        Ok(ClaimListing {
            records: vec![record("ns", "a", capacity, &format!("{}", n + 1))],
            resource_version: Some(format!("{}", n + 1)),
        })
    }

    fn watch(&mut self, _resource_version: Option<&str>) -> Result<WatchStream> {
        if self.watches.fetch_add(1, Ordering::SeqCst) == 0 {
            let fault: Result<WatchRecord> = Err(PvcwError::transport("flaky", "connection reset"));
            return Ok(WatchStream::new(std::iter::once(fault)));
        }
        Ok(WatchStream::new(std::iter::empty()))
    }
}

#[test]
fn transport_fault_heals_through_relist_until_shutdown() {
    let lists = Arc::new(AtomicUsize::new(0));
    let mut config = quiet_config("2Gi");
    config.watch.reconnect = true;
    let source = FlakySource {
        lists: Arc::clone(&lists),
        watches: Arc::new(AtomicUsize::new(0)),
    };
    let mut harness = Harness::new(config, Box::new(source));

    let signals = harness.daemon.signals();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(500));
        signals.request_shutdown();
    });
    let summary = harness.run();
    stopper.join().unwrap();

    assert_eq!(summary.stop_reason, StopReason::Signal);
    assert!(summary.faults >= 1);
    assert!(summary.resyncs >= 1);
    assert!(lists.load(Ordering::SeqCst) >= 2);
    assert_eq!(summary.final_total.to_string(), "3Gi");
    assert_eq!(harness.transitions(), vec![Transition::RoseAboveCeiling]);
}

struct NeverLists;

impl ClaimSource for NeverLists {
    fn name(&self) -> &'static str {
        "never"
    }

    fn list(&mut self) -> Result<ClaimListing> {
        thread::sleep(Duration::from_millis(50));
        Err(PvcwError::transport("never", "apiserver unreachable"))
    }

    fn watch(&mut self, _resource_version: Option<&str>) -> Result<WatchStream> {
        Ok(WatchStream::new(std::iter::empty()))
    }
}

#[test]
fn missing_baseline_times_out() {
    let mut config = quiet_config("1Gi");
    config.watch.reconnect = true;
    config.watch.cache_sync_timeout_ms = 300;
    let mut harness = Harness::new(config, Box::new(NeverLists));

    let err = harness.daemon.run().unwrap_err();
    assert_eq!(err.code(), "PVCW-2102");
    assert!(err.is_fatal());
}
