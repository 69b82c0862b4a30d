//! Activity logger: a dedicated thread owns the JSONL writer and an optional
//! human-readable stderr echo.
//!
//! Every other thread sends [`ActivityEvent`]s through a bounded crossbeam
//! channel. `send()` uses `try_send()` so event processing is never blocked by
//! logging back-pressure; overflow is counted and reported in the log.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{PvcwError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
use crate::monitor::quantity::Quantity;
use crate::monitor::threshold::Transition;

// ──────────────────── channel capacity ────────────────────

const CHANNEL_CAPACITY: usize = 1024;

// ──────────────────── public event type ────────────────────

/// Events the watcher reports to the activity log.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        config_hash: String,
        source: String,
        ceiling: Quantity,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    BaselineEstablished {
        claims: usize,
        total: Quantity,
        ceiling: Quantity,
    },
    ClaimAdded {
        claim: String,
        capacity: Quantity,
        total: Quantity,
        ceiling: Quantity,
    },
    ClaimModified {
        claim: String,
        previous: Quantity,
        capacity: Quantity,
        total: Quantity,
        ceiling: Quantity,
    },
    ClaimDeleted {
        claim: String,
        capacity: Quantity,
        total: Quantity,
        ceiling: Quantity,
    },
    ClaimRejected {
        claim: String,
        code: String,
        message: String,
    },
    Resynced {
        claims: usize,
        previous_total: Quantity,
        total: Quantity,
        ceiling: Quantity,
    },
    ThresholdCrossed {
        transition: Transition,
        total: Quantity,
        ceiling: Quantity,
    },
    TransportFault {
        code: String,
        message: String,
    },
    Inconsistency {
        claim: String,
        message: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Cheaply-cloneable handle for sending log events from any thread.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Send an event to the logger thread. Non-blocking; a full channel drops
    /// the event and bumps the dropped-events counter.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of events dropped due to channel back-pressure and not yet reported.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks only if the channel is full.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

impl std::fmt::Debug for ActivityLoggerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityLoggerHandle")
            .field("dropped_events", &self.dropped_events())
            .finish_non_exhaustive()
    }
}

// ──────────────────── configuration ────────────────────

#[derive(Debug, Clone)]
pub struct ActivityLoggerConfig {
    /// JSONL writer config. `None` disables the file log.
    pub jsonl_config: Option<JsonlConfig>,
    /// Echo a human-readable line per event to stderr.
    pub echo_stderr: bool,
    pub channel_capacity: usize,
}

impl Default for ActivityLoggerConfig {
    fn default() -> Self {
        Self {
            jsonl_config: Some(JsonlConfig::default()),
            echo_stderr: true,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread and return a handle plus its join handle.
///
/// The thread runs until `handle.shutdown()` is called or every handle is dropped.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("pvcw-logger".to_string())
        .spawn(move || {
            logger_thread_main(&rx, config.jsonl_config, config.echo_stderr, &dropped_clone);
        })
        .map_err(|e| PvcwError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

fn logger_thread_main(
    rx: &Receiver<ActivityEvent>,
    jsonl_config: Option<JsonlConfig>,
    echo_stderr: bool,
    dropped: &AtomicU64,
) {
    let mut jsonl = jsonl_config.map(JsonlWriter::open);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0
            && let Some(writer) = jsonl.as_mut()
        {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            writer.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }

        if let Some(writer) = jsonl.as_mut() {
            writer.write_entry(&event_to_log_entry(&event));
            // Keep `tail -f` readers current; the BufWriter is only a batching aid.
            if rx.is_empty() {
                writer.flush();
            }
        }
        if echo_stderr {
            for line in echo_lines(&event) {
                eprintln!("{} {line}", chrono::Local::now().format("%Y/%m/%d %H:%M:%S"));
            }
        }
    }

    if let Some(writer) = jsonl.as_mut() {
        writer.flush();
        writer.fsync();
    }
}

// ──────────────────── event conversion ────────────────────

fn with_totals(mut e: LogEntry, total: Quantity, ceiling: Quantity) -> LogEntry {
    e.total = Some(total.to_string());
    e.ceiling = Some(ceiling.to_string());
    e.utilization_pct = total.percent_of(&ceiling);
    e
}

#[allow(clippy::too_many_lines)]
fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::DaemonStarted {
            version,
            config_hash,
            source,
            ceiling,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStart, Severity::Info);
            e.ceiling = Some(ceiling.to_string());
            e.details = Some(format!(
                "version={version} config_hash={config_hash} source={source}"
            ));
            e.ok = Some(true);
            e
        }
        ActivityEvent::DaemonStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStop, Severity::Info);
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::BaselineEstablished {
            claims,
            total,
            ceiling,
        } => {
            let mut e = LogEntry::new(EventType::Baseline, Severity::Info);
            e.claims = Some(*claims);
            with_totals(e, *total, *ceiling)
        }
        ActivityEvent::ClaimAdded {
            claim,
            capacity,
            total,
            ceiling,
        } => {
            let mut e = LogEntry::new(EventType::ClaimAdd, Severity::Info);
            e.claim = Some(claim.clone());
            e.capacity = Some(capacity.to_string());
            with_totals(e, *total, *ceiling)
        }
        ActivityEvent::ClaimModified {
            claim,
            previous,
            capacity,
            total,
            ceiling,
        } => {
            let mut e = LogEntry::new(EventType::ClaimModify, Severity::Info);
            e.claim = Some(claim.clone());
            e.previous = Some(previous.to_string());
            e.capacity = Some(capacity.to_string());
            with_totals(e, *total, *ceiling)
        }
        ActivityEvent::ClaimDeleted {
            claim,
            capacity,
            total,
            ceiling,
        } => {
            let mut e = LogEntry::new(EventType::ClaimDelete, Severity::Info);
            e.claim = Some(claim.clone());
            e.capacity = Some(capacity.to_string());
            with_totals(e, *total, *ceiling)
        }
        ActivityEvent::ClaimRejected {
            claim,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::ClaimReject, Severity::Warning);
            e.claim = Some(claim.clone());
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Resynced {
            claims,
            previous_total,
            total,
            ceiling,
        } => {
            let mut e = LogEntry::new(EventType::Resync, Severity::Info);
            e.claims = Some(*claims);
            e.previous = Some(previous_total.to_string());
            with_totals(e, *total, *ceiling)
        }
        ActivityEvent::ThresholdCrossed {
            transition,
            total,
            ceiling,
        } => {
            let severity = match transition {
                Transition::RoseAboveCeiling => Severity::Critical,
                _ => Severity::Info,
            };
            let mut e = LogEntry::new(EventType::ThresholdCross, severity);
            e.transition = Some(transition.to_string());
            with_totals(e, *total, *ceiling)
        }
        ActivityEvent::TransportFault { code, message } => {
            let mut e = LogEntry::new(EventType::TransportFault, Severity::Warning);
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Inconsistency { claim, message } => {
            let mut e = LogEntry::new(EventType::Inconsistency, Severity::Warning);
            e.claim = Some(claim.clone());
            e.ok = Some(false);
            e.error_code = Some("PVCW-2201".to_string());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::DaemonStop, Severity::Info),
    }
}

fn usage_line(total: Quantity, ceiling: Quantity) -> String {
    match total.percent_of(&ceiling) {
        Some(pct) => format!("At {pct:.1}% claim capacity ({total}/{ceiling})"),
        None => format!("At {total} claimed (no ceiling set)"),
    }
}

/// Human-readable stderr lines for an event.
pub(crate) fn echo_lines(event: &ActivityEvent) -> Vec<String> {
    match event {
        ActivityEvent::DaemonStarted {
            version, ceiling, ..
        } => vec![format!("--- PVC Watch v{version} (max claims {ceiling}) ----")],
        ActivityEvent::DaemonStopped { reason, .. } => {
            vec![format!("shutting down watcher ({reason})")]
        }
        ActivityEvent::BaselineEstablished {
            claims,
            total,
            ceiling,
        } => vec![
            format!("SYNC: {claims} claims listed, total {total}"),
            usage_line(*total, *ceiling),
        ],
        ActivityEvent::ClaimAdded {
            claim,
            capacity,
            total,
            ceiling,
        } => vec![
            format!("ADD: PVC {claim} added, claim size {capacity}"),
            usage_line(*total, *ceiling),
        ],
        ActivityEvent::ClaimModified {
            claim,
            previous,
            capacity,
            total,
            ceiling,
        } => vec![
            format!("UPDATE: PVC {claim} updated, claim size {previous} -> {capacity}"),
            usage_line(*total, *ceiling),
        ],
        ActivityEvent::ClaimDeleted {
            claim,
            capacity,
            total,
            ceiling,
        } => vec![
            format!("DELETED: PVC {claim} removed, claim size {capacity}"),
            usage_line(*total, *ceiling),
        ],
        ActivityEvent::ClaimRejected { claim, message, .. } => {
            vec![format!("REJECT: PVC {claim} skipped: {message}")]
        }
        ActivityEvent::Resynced {
            claims,
            previous_total,
            total,
            ceiling,
        } => vec![
            format!("RESYNC: {claims} claims, total {previous_total} -> {total}"),
            usage_line(*total, *ceiling),
        ],
        ActivityEvent::ThresholdCrossed {
            transition,
            total,
            ceiling,
        } => match transition {
            Transition::RoseAboveCeiling => {
                vec![format!("Claim overage reached: max {ceiling} at {total}")]
            }
            Transition::FellToOrBelowCeiling => {
                vec![format!("Claim usage normal: max {ceiling} at {total}")]
            }
            Transition::None => Vec::new(),
        },
        ActivityEvent::TransportFault { message, .. } => vec![format!("WATCH: {message}")],
        ActivityEvent::Inconsistency { message, .. } => vec![format!("INCONSISTENT: {message}")],
        ActivityEvent::Error { message, .. } => vec![format!("ERROR: {message}")],
        ActivityEvent::Shutdown => Vec::new(),
    }
}

// ──────────────────── tests ────────────────────
