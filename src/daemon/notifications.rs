//! Threshold actions: journal, file, webhook, and command channels.
//!
//! The notification manager is the production [`ThresholdAction`]. Every
//! channel is fire-and-forget: failures are swallowed (or reported on stderr)
//! and never reach the watch loop.

#![allow(missing_docs)]

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::monitor::quantity::Quantity;
use crate::monitor::threshold::{ThresholdAction, ThresholdAlert, Transition};

// ──────────────────── notification level ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

// ──────────────────── notification events ────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    ThresholdCrossed {
        transition: Transition,
        total: Quantity,
        ceiling: Quantity,
        utilization_pct: Option<f64>,
    },
    DaemonStarted {
        version: String,
        source: String,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    Error {
        code: String,
        message: String,
    },
}

impl NotificationEvent {
    #[must_use]
    pub fn from_alert(alert: &ThresholdAlert) -> Self {
        Self::ThresholdCrossed {
            transition: alert.transition,
            total: alert.current_total,
            ceiling: alert.ceiling,
            utilization_pct: alert.utilization_pct(),
        }
    }

    #[must_use]
    pub const fn level(&self) -> NotificationLevel {
        match self {
            Self::ThresholdCrossed {
                transition: Transition::RoseAboveCeiling,
                ..
            } => NotificationLevel::Critical,
            Self::ThresholdCrossed { .. } | Self::Error { .. } => NotificationLevel::Warning,
            Self::DaemonStarted { .. } | Self::DaemonStopped { .. } => NotificationLevel::Info,
        }
    }

    /// Short human-readable summary line.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::ThresholdCrossed {
                transition: Transition::RoseAboveCeiling,
                total,
                ceiling,
                ..
            } => format!("WARNING: claim overage reached; max {ceiling}; at {total}"),
            Self::ThresholdCrossed { total, ceiling, .. } => {
                format!("INFO: claim usage normal; max {ceiling}; at {total}")
            }
            Self::DaemonStarted { version, source } => {
                format!("pvcwatch v{version} started, watching claims via {source}")
            }
            Self::DaemonStopped {
                reason,
                uptime_secs,
            } => {
                let hours = uptime_secs / 3600;
                let minutes = (uptime_secs % 3600) / 60;
                format!("pvcwatch stopped ({reason}) after {hours}h {minutes}m")
            }
            Self::Error { code, message } => format!("[{code}] {message}"),
        }
    }

    fn placeholders(&self) -> [(&'static str, String); 4] {
        let (transition, total, ceiling, pct) = match self {
            Self::ThresholdCrossed {
                transition,
                total,
                ceiling,
                utilization_pct,
            } => (
                transition.to_string(),
                total.to_string(),
                ceiling.to_string(),
                utilization_pct.map_or_else(|| "N/A".to_string(), |p| format!("{p:.1}")),
            ),
            _ => (
                Transition::None.to_string(),
                "N/A".to_string(),
                "N/A".to_string(),
                "N/A".to_string(),
            ),
        };
        [
            ("TRANSITION", transition),
            ("TOTAL", total),
            ("CEILING", ceiling),
            ("UTILIZATION_PCT", pct),
        ]
    }
}

// ──────────────────── configuration ────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationConfig {
    /// Master switch for all notifications.
    pub enabled: bool,
    /// Which channel names to activate.
    pub channels: Vec<String>,
    pub journal: JournalConfig,
    pub file: FileConfig,
    pub webhook: WebhookConfig,
    pub command: CommandConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: vec!["journal".to_string()],
            journal: JournalConfig::default(),
            file: FileConfig::default(),
            webhook: WebhookConfig::default(),
            command: CommandConfig::default(),
        }
    }
}

/// Journal settings (stderr, picked up by systemd or the terminal).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JournalConfig {
    pub min_level: NotificationLevel,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            min_level: NotificationLevel::Warning,
        }
    }
}

/// Append-only JSONL notification file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub path: PathBuf,
}

impl Default for FileConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME").map_or_else(std::env::temp_dir, PathBuf::from);
        Self {
            path: home
                .join(".local")
                .join("share")
                .join("pvcwatch")
                .join("notifications.jsonl"),
        }
    }
}

/// HTTP POST via curl.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: String,
    pub min_level: NotificationLevel,
    /// Body template with `${SUMMARY}`, `${TRANSITION}`, `${TOTAL}`, `${CEILING}`,
    /// `${UTILIZATION_PCT}` placeholders.
    pub template: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            min_level: NotificationLevel::Warning,
            template: r#"{"text": "pvcwatch: ${SUMMARY}"}"#.to_string(),
        }
    }
}

/// Hook executable run on each notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandConfig {
    pub enabled: bool,
    pub program: String,
    pub args: Vec<String>,
    pub min_level: NotificationLevel,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            program: String::new(),
            args: Vec::new(),
            min_level: NotificationLevel::Warning,
        }
    }
}

// ──────────────────── delivery ────────────────────

#[derive(Debug, Serialize)]
struct NotificationRecord<'a> {
    ts: String,
    level: NotificationLevel,
    summary: String,
    #[serde(flatten)]
    event: &'a NotificationEvent,
}

/// One configured delivery target. Each variant only carries what it needs
/// to send; delivery errors stay inside the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Channel {
    /// stderr, picked up by systemd or the terminal.
    Journal { min_level: NotificationLevel },
    /// Append-only JSONL file.
    File { path: PathBuf },
    /// JSON POST through `curl`.
    Webhook {
        url: String,
        template: String,
        min_level: NotificationLevel,
    },
    /// Hook executable with the event in its environment.
    Command {
        program: String,
        args: Vec<String>,
        min_level: NotificationLevel,
    },
}

impl Channel {
    /// Build the channel called `name`, or `None` when it is unknown or off.
    fn configured(name: &str, config: &NotificationConfig) -> Option<Self> {
        let channel = match name {
            "journal" => Self::Journal {
                min_level: config.journal.min_level,
            },
            "file" => Self::File {
                path: config.file.path.clone(),
            },
            "webhook" if config.webhook.enabled => Self::Webhook {
                url: config.webhook.url.clone(),
                template: config.webhook.template.clone(),
                min_level: config.webhook.min_level,
            },
            "command" if config.command.enabled => Self::Command {
                program: config.command.program.clone(),
                args: config.command.args.clone(),
                min_level: config.command.min_level,
            },
            _ => return None,
        };
        Some(channel)
    }

    const fn name(&self) -> &'static str {
        match self {
            Self::Journal { .. } => "journal",
            Self::File { .. } => "file",
            Self::Webhook { .. } => "webhook",
            Self::Command { .. } => "command",
        }
    }

    fn accepts(&self, level: NotificationLevel) -> bool {
        match self {
            Self::File { .. } => true,
            Self::Journal { min_level }
            | Self::Webhook { min_level, .. }
            | Self::Command { min_level, .. } => level >= *min_level,
        }
    }

    fn deliver(&self, event: &NotificationEvent) {
        if !self.accepts(event.level()) {
            return;
        }
        match self {
            Self::Journal { .. } => write_journal(event),
            Self::File { path } => append_record(path, event),
            Self::Webhook { url, template, .. } => {
                if url.is_empty() {
                    return;
                }
                let _ = Command::new("curl")
                    .args(curl_args(url, &render_body(template, event)))
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn();
            }
            Self::Command { program, args, .. } => {
                if program.is_empty() {
                    return;
                }
                if let Err(e) = hook_command(program, args, event).spawn() {
                    eprintln!("[PVCW-NOTIFY] failed to run hook {program}: {e}");
                }
            }
        }
    }
}

fn write_journal(event: &NotificationEvent) {
    let priority = match event.level() {
        NotificationLevel::Critical => "CRIT",
        NotificationLevel::Warning => "NOTICE",
        NotificationLevel::Info => "INFO",
    };
    if matches!(event, NotificationEvent::ThresholdCrossed { .. }) {
        eprintln!("[PVCW-NOTIFY] [{priority}] *** Taking action ***");
    }
    eprintln!("[PVCW-NOTIFY] [{priority}] {}", event.summary());
}

fn append_record(path: &Path, event: &NotificationEvent) {
    let record = NotificationRecord {
        ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        level: event.level(),
        summary: event.summary(),
        event,
    };
    let Ok(mut line) = serde_json::to_vec(&record) else {
        return;
    };
    line.push(b'\n');

    if let Some(dir) = path.parent() {
        let _ = fs::create_dir_all(dir);
    }
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        options.mode(0o600);
    }
    if let Ok(mut file) = options.open(path) {
        let _ = file.write_all(&line);
    }
}

/// Substitute `${NAME}` placeholders, JSON-escaping each value.
fn render_body(template: &str, event: &NotificationEvent) -> String {
    let summary = ("SUMMARY", event.summary());
    event
        .placeholders()
        .into_iter()
        .chain(std::iter::once(summary))
        .fold(template.to_string(), |body, (name, value)| {
            let quoted = serde_json::Value::String(value).to_string();
            let escaped = &quoted[1..quoted.len() - 1];
            body.replace(&format!("${{{name}}}"), escaped)
        })
}

fn curl_args(url: &str, body: &str) -> Vec<String> {
    [
        "--silent",
        "--max-time",
        "5",
        "--header",
        "Content-Type: application/json",
        "--data",
        body,
        url,
    ]
    .map(str::to_string)
    .into()
}

fn hook_command(program: &str, args: &[String], event: &NotificationEvent) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .env("PVCW_SUMMARY", event.summary())
        .env("PVCW_LEVEL", event.level().to_string());
    for (name, value) in event.placeholders() {
        cmd.env(format!("PVCW_{name}"), value);
    }
    cmd
}

// ──────────────────── notification manager ────────────────────

/// Fans each event out to the configured channels. Never fails.
#[derive(Debug, Default)]
pub struct NotificationManager {
    channels: Vec<Channel>,
    enabled: bool,
    sent: u64,
}

impl NotificationManager {
    /// Channels are kept in the order they are listed; unknown names and
    /// channels switched off in their own section are skipped.
    #[must_use]
    pub fn from_config(config: &NotificationConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        Self {
            channels: config
                .channels
                .iter()
                .filter_map(|name| Channel::configured(name, config))
                .collect(),
            enabled: true,
            sent: 0,
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn notify(&mut self, event: &NotificationEvent) {
        if !self.enabled {
            return;
        }
        self.sent += 1;
        self.channels.iter().for_each(|channel| channel.deliver(event));
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Events dispatched so far.
    #[must_use]
    pub const fn sent(&self) -> u64 {
        self.sent
    }

    #[must_use]
    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(Channel::name).collect()
    }
}

impl ThresholdAction for NotificationManager {
    fn on_transition(&mut self, alert: &ThresholdAlert) {
        self.notify(&NotificationEvent::from_alert(alert));
    }
}

// ──────────────────── tests ────────────────────
