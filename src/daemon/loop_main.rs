//! Watch loop: startup sequencing, the single consumer lane, shutdown.
//!
//! Threads, all talking over bounded crossbeam channels:
//! - **Main thread**: waits for the baseline, then is the only caller of
//!   [`EventDispatcher::apply`]. Polls signal flags between events.
//! - **Feed thread** (`pvcw-feed`) plus its watch reader: lists, watches,
//!   reconnects; see [`crate::source::feed`].
//! - **Reporter thread** (`pvcw-reporter`, optional): prints a claim table
//!   from a [`LedgerView`] snapshot every `report.interval_secs`.
//! - **Logger thread** (`pvcw-logger`): JSONL activity log and stderr echo.
//!
//! Nothing is persisted: on shutdown the store and the running total are
//! dropped with the process.

#![allow(missing_docs)]

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::select;
use parking_lot::Mutex;
use serde::Serialize;

use crate::core::config::Config;
use crate::core::errors::{PvcwError, Result};
use crate::daemon::notifications::{NotificationEvent, NotificationManager};
use crate::daemon::signals::SignalHandler;
use crate::logger::activity::{
    ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger,
};
use crate::logger::jsonl::JsonlConfig;
use crate::monitor::dispatcher::{
    ClaimEvent, DispatchOutcome, DispatchStats, EventDispatcher, LedgerView,
};
use crate::monitor::quantity::Quantity;
use crate::monitor::report::ClaimReport;
use crate::monitor::threshold::{NoAction, ThresholdAction, ThresholdMonitor};
use crate::source::ClaimSource;
use crate::source::feed::{FeedHandle, FeedOptions, start_feed};

/// Upper bound on how long the main loop goes without checking signal flags.
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const LOGGER_CHANNEL_CAP: usize = 1024;

/// Where claim tables go. Shared with the reporter thread.
pub type ReportSink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Report sink writing to stdout.
#[must_use]
pub fn stdout_sink() -> ReportSink {
    Arc::new(Mutex::new(Box::new(io::stdout())))
}

/// Runtime switches that are not part of the config file.
#[derive(Debug, Clone, Default)]
pub struct DaemonArgs {
    /// Emit reports as one JSON object per line instead of tables.
    pub json_reports: bool,
    /// Install SIGTERM/SIGINT/SIGHUP/SIGUSR1 handlers.
    pub handle_signals: bool,
}

// ──────────────────── run summary ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Shutdown requested by a signal or a programmatic request.
    Signal,
    /// The feed ended (finite replay, or reconnect disabled).
    FeedClosed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Signal => "shutdown requested",
            Self::FeedClosed => "feed closed",
        })
    }
}

/// Counters and final state of one [`WatchDaemon::run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub events_applied: u64,
    pub events_unchanged: u64,
    pub events_rejected: u64,
    pub faults: u64,
    pub inconsistencies: u64,
    /// Ceiling crossings in either direction, baseline included.
    pub transitions: u64,
    /// Full listings applied after the baseline.
    pub resyncs: u64,
    pub claims: usize,
    pub final_total: Quantity,
    pub ceiling: Quantity,
    pub over_ceiling: bool,
    pub stop_reason: StopReason,
    pub uptime_secs: u64,
}

impl RunSummary {
    fn new(
        stats: DispatchStats,
        monitor: &ThresholdMonitor,
        view: &LedgerView,
        stop_reason: StopReason,
        uptime: Duration,
    ) -> Self {
        Self {
            events_applied: stats.applied,
            events_unchanged: stats.unchanged,
            events_rejected: stats.rejected,
            faults: stats.faults,
            inconsistencies: stats.inconsistencies,
            transitions: monitor.crossings(),
            resyncs: stats.resyncs.saturating_sub(1),
            claims: view.claim_count(),
            final_total: view.total(),
            ceiling: monitor.ceiling(),
            over_ceiling: monitor.is_over(),
            stop_reason,
            uptime_secs: uptime.as_secs(),
        }
    }
}

// ──────────────────── daemon ────────────────────

/// Owns the pipeline from a [`ClaimSource`] to the threshold action.
pub struct WatchDaemon {
    config: Config,
    ceiling: Quantity,
    source: Option<Box<dyn ClaimSource>>,
    action: Option<Box<dyn ThresholdAction>>,
    logger_handle: ActivityLoggerHandle,
    logger_join: Option<JoinHandle<()>>,
    signal_handler: SignalHandler,
    notification_manager: NotificationManager,
    report_sink: ReportSink,
    json_reports: bool,
    start_time: Instant,
}

impl WatchDaemon {
    /// Validate the ceiling and start the logger. Nothing touches the
    /// cluster until [`WatchDaemon::run`].
    pub fn init(config: Config, source: Box<dyn ClaimSource>, args: &DaemonArgs) -> Result<Self> {
        let ceiling = config.ceiling()?;

        let jsonl_config = config.logging.jsonl_enabled.then(|| JsonlConfig {
            path: config.logging.jsonl_log.clone(),
            max_size_bytes: config.logging.jsonl_max_size_bytes,
            max_rotated_files: config.logging.jsonl_max_rotated_files,
            ..JsonlConfig::default()
        });
        let (logger_handle, logger_join) = spawn_logger(ActivityLoggerConfig {
            jsonl_config,
            echo_stderr: config.logging.stderr,
            channel_capacity: LOGGER_CHANNEL_CAP,
        })?;

        let signal_handler = if args.handle_signals {
            SignalHandler::new()
        } else {
            SignalHandler::detached()
        };
        let notification_manager = NotificationManager::from_config(&config.notifications);

        Ok(Self {
            config,
            ceiling,
            source: Some(source),
            action: None,
            logger_handle,
            logger_join: Some(logger_join),
            signal_handler,
            notification_manager,
            report_sink: stdout_sink(),
            json_reports: args.json_reports,
            start_time: Instant::now(),
        })
    }

    /// Replace the notification channels as the crossing action.
    #[must_use]
    pub fn with_action(mut self, action: Box<dyn ThresholdAction>) -> Self {
        self.action = Some(action);
        self
    }

    #[must_use]
    pub fn with_report_sink(mut self, sink: ReportSink) -> Self {
        self.report_sink = sink;
        self
    }

    /// Handle for stopping or poking the loop from elsewhere.
    #[must_use]
    pub fn signals(&self) -> SignalHandler {
        self.signal_handler.clone()
    }

    #[must_use]
    pub const fn ceiling(&self) -> Quantity {
        self.ceiling
    }

    /// Run until shutdown is requested or the feed closes.
    ///
    /// Startup failures (no baseline within `cache_sync_timeout_ms`, feed
    /// thread not spawnable) are returned as errors; per-event failures never
    /// end the loop.
    pub fn run(&mut self) -> Result<RunSummary> {
        let source = self.source.take().ok_or_else(|| PvcwError::Runtime {
            details: "watch daemon already ran".to_string(),
        })?;
        let source_label = format!("{}/{}", source.name(), self.config.watch.mode);

        self.logger_handle.send(ActivityEvent::DaemonStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: self.config.stable_hash().unwrap_or_default(),
            source: source_label.clone(),
            ceiling: self.ceiling,
        });
        self.notification_manager
            .notify(&NotificationEvent::DaemonStarted {
                version: env!("CARGO_PKG_VERSION").to_string(),
                source: source_label,
            });

        let result = self.run_pipeline(source);
        let reason = match &result {
            Ok(summary) => summary.stop_reason.to_string(),
            Err(error) => {
                self.logger_handle.send(ActivityEvent::Error {
                    code: error.code().to_string(),
                    message: error.to_string(),
                });
                self.notification_manager.notify(&NotificationEvent::Error {
                    code: error.code().to_string(),
                    message: error.to_string(),
                });
                format!("startup failure: {}", error.code())
            }
        };
        self.shutdown(&reason);
        result
    }

    fn run_pipeline(&mut self, source: Box<dyn ClaimSource>) -> Result<RunSummary> {
        let action: Box<dyn ThresholdAction> = match self.action.take() {
            Some(action) => action,
            None => Box::new(NotificationManager::from_config(&self.config.notifications)),
        };
        let mut dispatcher = EventDispatcher::new(ThresholdMonitor::new(self.ceiling, action))
            .with_activity(self.logger_handle.clone());
        let view = dispatcher.view();

        let feed = start_feed(source, FeedOptions::from_watch(&self.config.watch))?;

        // Baseline first: nothing queued on the feed is applied before it.
        let timeout = Duration::from_millis(self.config.watch.cache_sync_timeout_ms);
        let signals = self.signal_handler.clone();
        let baseline = match feed.wait_for_sync(timeout, || signals.should_shutdown()) {
            Ok(Some(records)) => records,
            Ok(None) => {
                feed.stop();
                return Ok(self.summary(&dispatcher, &view, StopReason::Signal));
            }
            Err(error) => {
                feed.stop();
                return Err(error);
            }
        };
        if let DispatchOutcome::Resynced { rejected, .. } =
            dispatcher.apply(ClaimEvent::Sync(baseline))
            && rejected > 0
        {
            eprintln!("[PVCW-DAEMON] baseline skipped {rejected} malformed claim(s)");
        }
        self.logger_handle.send(ActivityEvent::BaselineEstablished {
            claims: view.claim_count(),
            total: view.total(),
            ceiling: self.ceiling,
        });

        if self.config.report.initial {
            write_report(&self.report_sink, &view.snapshot(), self.json_reports);
        }

        let reporter_stop = Arc::new(AtomicBool::new(false));
        let reporter = if self.config.report.interval_secs > 0 {
            Some(spawn_reporter(
                view.clone(),
                Duration::from_secs(self.config.report.interval_secs),
                Arc::clone(&self.report_sink),
                self.json_reports,
                Arc::clone(&reporter_stop),
            )?)
        } else {
            None
        };

        let stop_reason = self.consume(&feed, &mut dispatcher, &view);

        reporter_stop.store(true, Ordering::Relaxed);
        if let Some(join) = reporter
            && join.join().is_err()
        {
            eprintln!("[PVCW-DAEMON] reporter thread panicked");
        }
        feed.stop();

        Ok(self.summary(&dispatcher, &view, stop_reason))
    }

    /// The single consumer lane: one event at a time until stop.
    fn consume(
        &self,
        feed: &FeedHandle,
        dispatcher: &mut EventDispatcher,
        view: &LedgerView,
    ) -> StopReason {
        let events = feed.events();
        loop {
            if self.signal_handler.should_shutdown() {
                eprintln!("[PVCW-DAEMON] shutdown requested");
                return StopReason::Signal;
            }
            if self.signal_handler.should_resync() {
                eprintln!("[PVCW-DAEMON] forced relist requested");
                feed.request_resync();
            }
            if self.signal_handler.should_report() {
                write_report(&self.report_sink, &view.snapshot(), self.json_reports);
            }

            select! {
                recv(events) -> msg => match msg {
                    Ok(event) => {
                        if dispatcher.apply(event).needs_resync() {
                            feed.request_resync();
                        }
                    }
                    Err(_) => return StopReason::FeedClosed,
                },
                default(POLL_INTERVAL) => {}
            }
        }
    }

    fn summary(
        &self,
        dispatcher: &EventDispatcher,
        view: &LedgerView,
        stop_reason: StopReason,
    ) -> RunSummary {
        RunSummary::new(
            dispatcher.stats(),
            dispatcher.monitor(),
            view,
            stop_reason,
            self.start_time.elapsed(),
        )
    }

    // ──────────────────── shutdown ────────────────────

    fn shutdown(&mut self, reason: &str) {
        let uptime_secs = self.start_time.elapsed().as_secs();

        self.logger_handle.send(ActivityEvent::DaemonStopped {
            reason: reason.to_string(),
            uptime_secs,
        });
        self.notification_manager
            .notify(&NotificationEvent::DaemonStopped {
                reason: reason.to_string(),
                uptime_secs,
            });

        self.logger_handle.shutdown();
        if let Some(logger_join) = self.logger_join.take()
            && logger_join.join().is_err()
        {
            eprintln!("[PVCW-DAEMON] logger thread panicked");
        }

        let dropped = self.logger_handle.dropped_events();
        if dropped > 0 {
            eprintln!("[PVCW-DAEMON] {dropped} activity events dropped under back-pressure");
        }
        eprintln!("[PVCW-DAEMON] stopped ({reason}, uptime={uptime_secs}s)");
    }
}

impl fmt::Debug for WatchDaemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchDaemon")
            .field("ceiling", &self.ceiling)
            .field("mode", &self.config.watch.mode)
            .field("ran", &self.source.is_none())
            .field("json_reports", &self.json_reports)
            .finish_non_exhaustive()
    }
}

// ──────────────────── one-shot listing ────────────────────

/// List once, reconcile into a fresh ledger, and return the report.
///
/// Malformed claims are skipped with a warning, as in the watch loop.
pub fn collect_report(source: &mut dyn ClaimSource, ceiling: Quantity) -> Result<ClaimReport> {
    let listing = source.list()?;
    let mut dispatcher = EventDispatcher::new(ThresholdMonitor::new(ceiling, Box::new(NoAction)));
    if let DispatchOutcome::Resynced { rejected, .. } =
        dispatcher.apply(ClaimEvent::Sync(listing.records))
        && rejected > 0
    {
        eprintln!("[PVCW-LIST] skipped {rejected} malformed claim(s)");
    }
    Ok(dispatcher.view().snapshot())
}

// ──────────────────── reporting ────────────────────

/// Table text, or one JSON line.
pub fn render_report(report: &ClaimReport, json: bool) -> Result<String> {
    if json {
        let mut line = serde_json::to_string(report)?;
        line.push('\n');
        Ok(line)
    } else {
        Ok(report.render_table())
    }
}

fn write_report(sink: &ReportSink, report: &ClaimReport, json: bool) {
    let text = match render_report(report, json) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("[PVCW-REPORT] failed to render claim report: {e}");
            return;
        }
    };
    let mut out = sink.lock();
    if let Err(e) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
        eprintln!("[PVCW-REPORT] failed to write claim report: {e}");
    }
}

fn spawn_reporter(
    view: LedgerView,
    interval: Duration,
    sink: ReportSink,
    json: bool,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("pvcw-reporter".to_string())
        .spawn(move || reporter_thread_main(&view, interval, &sink, json, &stop))
        .map_err(|e| PvcwError::Runtime {
            details: format!("failed to spawn reporter thread: {e}"),
        })
}

fn reporter_thread_main(
    view: &LedgerView,
    interval: Duration,
    sink: &ReportSink,
    json: bool,
    stop: &AtomicBool,
) {
    let ticker = crossbeam_channel::tick(interval);
    while !stop.load(Ordering::Relaxed) {
        if ticker.recv_timeout(POLL_INTERVAL).is_ok() {
            write_report(sink, &view.snapshot(), json);
        }
    }
}
