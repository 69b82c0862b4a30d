//! JSONL activity log: one self-contained JSON object per line.
//!
//! Lines are assembled in memory and written with a single `write_all` so a
//! concurrent `tail -f` never sees a partial line.
//!
//! Logging failures never reach the watcher: the writer degrades from the
//! primary file to the fallback file, then to stderr, then drops lines.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions, rename};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

const BUFFER_BYTES: usize = 64 * 1024;

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Event types written to the activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DaemonStart,
    DaemonStop,
    Baseline,
    ClaimAdd,
    ClaimModify,
    ClaimDelete,
    ClaimReject,
    Resync,
    ThresholdCross,
    TransportFault,
    Inconsistency,
    Error,
}

/// A single JSONL log entry. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Claim key as `namespace/name`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim: Option<String>,
    /// Claim capacity after the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<String>,
    /// Claim capacity before the event (modifications).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
    /// Number of claims (baseline and resync).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<usize>,
    /// Aggregate total after the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ceiling: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utilization_pct: Option<f64>,
    /// Threshold transition label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// PVCW error code when the event reports a failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            claim: None,
            capacity: None,
            previous: None,
            claims: None,
            total: None,
            ceiling: None,
            utilization_pct: None,
            transition: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

/// Configuration for the JSONL writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    /// Primary log file path.
    pub path: PathBuf,
    /// Optional fallback path, ideally on a different filesystem.
    pub fallback_path: Option<PathBuf>,
    /// Maximum file size before rotation (bytes). Default: 32 MiB.
    pub max_size_bytes: u64,
    /// Number of rotated files to keep. Default: 3.
    pub max_rotated_files: u32,
    /// Seconds between forced fsync calls. Default: 10.
    pub fsync_interval_secs: u64,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: default_jsonl_path(),
            fallback_path: Some(std::env::temp_dir().join("pvcwatch-activity.jsonl")),
            max_size_bytes: 32 * 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 10,
        }
    }
}

/// `~/.local/share/pvcwatch/activity.jsonl`, or under the temp dir without `HOME`.
#[must_use]
pub fn default_jsonl_path() -> PathBuf {
    std::env::var_os("HOME").map_or_else(
        || std::env::temp_dir().join("pvcwatch").join("activity.jsonl"),
        |home| PathBuf::from(home).join(".local/share/pvcwatch/activity.jsonl"),
    )
}


/// Which configured path a file sink writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Primary,
    Fallback,
}

/// Where the next line goes. Demotion only moves down this list.
enum Sink {
    File(FileSink),
    Stderr,
    Discard,
}

/// An open, appendable log file and its current length.
struct FileSink {
    tier: Tier,
    path: PathBuf,
    out: BufWriter<File>,
    len: u64,
}

impl FileSink {
    fn open(tier: Tier, path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata().map_or(0, |meta| meta.len());
        Ok(Self {
            tier,
            path: path.to_path_buf(),
            out: BufWriter::with_capacity(BUFFER_BYTES, file),
            len,
        })
    }

    /// Shift `log.N` to `log.N+1` for the last `keep` generations and
    /// start an empty file in place of the current one.
    fn rotate(&mut self, keep: u32) -> io::Result<()> {
        self.out.flush()?;
        for generation in (1..keep).rev() {
            let _ = rename(
                generation_path(&self.path, generation),
                generation_path(&self.path, generation + 1),
            );
        }
        if keep > 0 {
            rename(&self.path, generation_path(&self.path, 1))?;
        } else {
            fs::remove_file(&self.path)?;
        }
        *self = Self::open(self.tier, &self.path)?;
        Ok(())
    }

    fn append(&mut self, line: &[u8]) -> io::Result<()> {
        self.out.write_all(line)?;
        self.len += line.len() as u64;
        Ok(())
    }
}

/// Append-only JSONL writer with size-based rotation.
///
/// A failing file demotes the writer to the fallback file, then to stderr,
/// then to discarding lines. It never returns to a higher tier on its own.
pub struct JsonlWriter {
    config: JsonlConfig,
    sink: Sink,
    synced_at: Instant,
}

impl JsonlWriter {
    /// Open the primary path, falling back as far as needed.
    pub fn open(config: JsonlConfig) -> Self {
        let sink = match FileSink::open(Tier::Primary, &config.path) {
            Ok(file) => Sink::File(file),
            Err(error) => open_fallback(&config, &error),
        };
        Self {
            config,
            sink,
            synced_at: Instant::now(),
        }
    }

    /// Serialize `entry` and append it as one line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_vec(entry) {
            Ok(mut line) => {
                line.push(b'\n');
                self.append(&line);
            }
            Err(e) => {
                let _ = writeln!(io::stderr(), "[PVCW-JSONL] serialize error: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Sink::File(file) = &mut self.sink {
            let _ = file.out.flush();
        }
    }

    /// Flush buffered lines and sync file data to disk.
    pub fn fsync(&mut self) {
        if let Sink::File(file) = &mut self.sink {
            let _ = file.out.flush();
            let _ = file.out.get_ref().sync_data();
        }
        self.synced_at = Instant::now();
    }

    /// `primary`, `fallback`, `stderr` or `discard`.
    pub fn state(&self) -> &'static str {
        match &self.sink {
            Sink::File(FileSink { tier: Tier::Primary, .. }) => "primary",
            Sink::File(FileSink { tier: Tier::Fallback, .. }) => "fallback",
            Sink::Stderr => "stderr",
            Sink::Discard => "discard",
        }
    }

    /// Length of the active log file, including lines from earlier runs.
    pub fn bytes_written(&self) -> u64 {
        match &self.sink {
            Sink::File(file) => file.len,
            Sink::Stderr | Sink::Discard => 0,
        }
    }

    // ──── internals ────

    fn append(&mut self, line: &[u8]) {
        loop {
            match &mut self.sink {
                Sink::File(file) => {
                    let full = file.len > 0 && file.len + line.len() as u64 > self.config.max_size_bytes;
                    let written = if full && let Err(e) = file.rotate(self.config.max_rotated_files) {
                        Err(e)
                    } else {
                        file.append(line)
                    };
                    match written {
                        Ok(()) => break,
                        Err(error) => self.demote(&error),
                    }
                }
                Sink::Stderr => {
                    let text = String::from_utf8_lossy(line);
                    if write!(io::stderr(), "[PVCW-JSONL] {text}").is_ok() {
                        break;
                    }
                    self.sink = Sink::Discard;
                }
                Sink::Discard => return,
            }
        }
        if self.synced_at.elapsed() >= Duration::from_secs(self.config.fsync_interval_secs) {
            self.fsync();
        }
    }

    fn demote(&mut self, error: &io::Error) {
        self.sink = match &self.sink {
            Sink::File(FileSink { tier: Tier::Primary, .. }) => open_fallback(&self.config, error),
            Sink::File(FileSink { tier: Tier::Fallback, path, .. }) => {
                let _ = writeln!(
                    io::stderr(),
                    "[PVCW-JSONL] {} failed ({error}), logging to stderr",
                    path.display()
                );
                Sink::Stderr
            }
            Sink::Stderr | Sink::Discard => Sink::Discard,
        };
    }
}

fn open_fallback(config: &JsonlConfig, cause: &io::Error) -> Sink {
    let primary = config.path.display();
    let Some(path) = config.fallback_path.as_deref() else {
        let _ = writeln!(io::stderr(), "[PVCW-JSONL] {primary}: {cause}; logging to stderr");
        return Sink::Stderr;
    };
    match FileSink::open(Tier::Fallback, path) {
        Ok(file) => {
            let _ = writeln!(
                io::stderr(),
                "[PVCW-JSONL] {primary}: {cause}; logging to {}",
                path.display()
            );
            Sink::File(file)
        }
        Err(error) => {
            let _ = writeln!(
                io::stderr(),
                "[PVCW-JSONL] {primary}: {cause}; {}: {error}; logging to stderr",
                path.display()
            );
            Sink::Stderr
        }
    }
}

/// `activity.jsonl` becomes `activity.jsonl.2` for generation 2.
fn generation_path(base: &Path, generation: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ──── tests ────
