//! Configuration system: TOML file + env var overrides + defaults.

#![allow(missing_docs)]

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{PvcwError, Result};
use crate::daemon::notifications::NotificationConfig;
use crate::monitor::quantity::Quantity;

/// Full pvcwatch configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub watch: WatchConfig,
    pub threshold: ThresholdConfig,
    pub report: ReportConfig,
    pub logging: LoggingConfig,
    pub notifications: NotificationConfig,
    /// Where this config was loaded from; not part of the file.
    #[serde(skip)]
    pub config_file: PathBuf,
}

/// How the event feed is derived from the watch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Forward watch notifications as they arrive.
    #[default]
    Raw,
    /// Maintain a local cache and emit periodic full syncs.
    Informer,
}

impl fmt::Display for WatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Raw => "raw",
            Self::Informer => "informer",
        })
    }
}

impl FromStr for WatchMode {
    type Err = PvcwError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "informer" => Ok(Self::Informer),
            other => Err(PvcwError::InvalidConfig {
                details: format!("watch.mode must be \"raw\" or \"informer\", got {other:?}"),
            }),
        }
    }
}

/// Cluster selection and feed tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatchConfig {
    /// Empty watches every namespace.
    pub namespace: String,
    pub label_selector: String,
    pub field_selector: String,
    /// Empty lets kubectl resolve its own kubeconfig.
    pub kubeconfig: String,
    pub context: String,
    pub kubectl_path: String,
    pub mode: WatchMode,
    pub resync_interval_ms: u64,
    pub cache_sync_timeout_ms: u64,
    pub queue_capacity: usize,
    pub reconnect: bool,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            label_selector: String::new(),
            field_selector: String::new(),
            kubeconfig: String::new(),
            context: String::new(),
            kubectl_path: "kubectl".to_string(),
            mode: WatchMode::Raw,
            resync_interval_ms: 3_000,
            cache_sync_timeout_ms: 30_000,
            queue_capacity: 1024,
            reconnect: true,
            backoff_initial_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Ceiling for total claimed capacity, in quantity notation.
    pub max_claims: String,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            max_claims: "200Gi".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReportConfig {
    /// Seconds between periodic claim tables; 0 disables.
    pub interval_secs: u64,
    /// Print the table once the baseline listing is applied.
    pub initial: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            interval_secs: 0,
            initial: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Human-readable event lines on stderr.
    pub stderr: bool,
    pub jsonl_enabled: bool,
    pub jsonl_log: PathBuf,
    pub jsonl_max_size_bytes: u64,
    pub jsonl_max_rotated_files: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stderr: true,
            jsonl_enabled: true,
            jsonl_log: crate::logger::jsonl::default_jsonl_path(),
            jsonl_max_size_bytes: 32 * 1024 * 1024,
            jsonl_max_rotated_files: 3,
        }
    }
}

impl Config {
    /// `~/.config/pvcwatch/config.toml`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        let home = env::var_os("HOME").map_or_else(
            || {
                eprintln!("[PVCW-CONFIG] WARNING: HOME not set, using temp dir for config path");
                env::temp_dir()
            },
            PathBuf::from,
        );
        home.join(".config").join("pvcwatch").join("config.toml")
    }

    /// Load config from the default or an explicit path, then apply env overrides.
    ///
    /// A missing file at the default path means defaults; a missing explicit
    /// path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| PvcwError::io(&path_buf, source))?;
            Self::from_toml_str(&raw)?
        } else if path.is_some() {
            return Err(PvcwError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without env overrides or validation.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Deterministic FNV-1a hash of the effective config for startup logging.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// The ceiling parsed from `threshold.max_claims`.
    pub fn ceiling(&self) -> Result<Quantity> {
        let ceiling = Quantity::parse(&self.threshold.max_claims)?;
        if ceiling.is_negative() {
            return Err(PvcwError::invalid_quantity(
                &self.threshold.max_claims,
                "threshold.max_claims must not be negative",
            ));
        }
        Ok(ceiling)
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // Legacy variable first so the prefixed one wins when both are set.
        if let Some(raw) = lookup("K8S_NAMESPACE") {
            self.watch.namespace = raw;
        }
        for (name, slot) in [
            ("PVCW_NAMESPACE", &mut self.watch.namespace),
            ("PVCW_LABEL_SELECTOR", &mut self.watch.label_selector),
            ("PVCW_FIELD_SELECTOR", &mut self.watch.field_selector),
            ("PVCW_KUBECONFIG", &mut self.watch.kubeconfig),
            ("PVCW_CONTEXT", &mut self.watch.context),
            ("PVCW_KUBECTL", &mut self.watch.kubectl_path),
            ("PVCW_MAX_CLAIMS", &mut self.threshold.max_claims),
        ] {
            if let Some(raw) = lookup(name) {
                *slot = raw;
            }
        }

        if let Some(raw) = lookup("PVCW_MODE") {
            self.watch.mode = raw.parse().map_err(|_| PvcwError::ConfigParse {
                context: "env",
                details: format!("PVCW_MODE={raw:?}: expected raw or informer"),
            })?;
        }
        if let Some(raw) = lookup("PVCW_RESYNC_INTERVAL_MS") {
            self.watch.resync_interval_ms = parse_env_u64("PVCW_RESYNC_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = lookup("PVCW_CACHE_SYNC_TIMEOUT_MS") {
            self.watch.cache_sync_timeout_ms = parse_env_u64("PVCW_CACHE_SYNC_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("PVCW_REPORT_INTERVAL_SECS") {
            self.report.interval_secs = parse_env_u64("PVCW_REPORT_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("PVCW_LOG_STDERR") {
            self.logging.stderr = parse_env_bool("PVCW_LOG_STDERR", &raw)?;
        }
        if let Some(raw) = lookup("PVCW_JSONL_LOG") {
            self.logging.jsonl_log = PathBuf::from(raw);
        }
        Ok(())
    }

    fn normalize(&mut self) {
        for value in [
            &mut self.watch.namespace,
            &mut self.watch.label_selector,
            &mut self.watch.field_selector,
            &mut self.watch.context,
            &mut self.threshold.max_claims,
        ] {
            let trimmed = value.trim();
            if trimmed.len() != value.len() {
                *value = trimmed.to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.ceiling()?;

        if self.watch.kubectl_path.trim().is_empty() {
            return Err(PvcwError::InvalidConfig {
                details: "watch.kubectl_path must not be empty".to_string(),
            });
        }

        for (name, val) in [
            ("watch.resync_interval_ms", self.watch.resync_interval_ms),
            ("watch.cache_sync_timeout_ms", self.watch.cache_sync_timeout_ms),
            ("watch.backoff_initial_ms", self.watch.backoff_initial_ms),
            ("watch.backoff_max_ms", self.watch.backoff_max_ms),
        ] {
            if val == 0 {
                return Err(PvcwError::InvalidConfig {
                    details: format!("{name} must be > 0"),
                });
            }
        }

        if self.watch.queue_capacity == 0 {
            return Err(PvcwError::InvalidConfig {
                details: "watch.queue_capacity must be >= 1".to_string(),
            });
        }

        if self.watch.backoff_initial_ms > self.watch.backoff_max_ms {
            return Err(PvcwError::InvalidConfig {
                details: format!(
                    "watch.backoff_initial_ms ({}) must be <= watch.backoff_max_ms ({})",
                    self.watch.backoff_initial_ms, self.watch.backoff_max_ms
                ),
            });
        }

        if self.logging.jsonl_enabled && self.logging.jsonl_max_size_bytes == 0 {
            return Err(PvcwError::InvalidConfig {
                details: "logging.jsonl_max_size_bytes must be > 0".to_string(),
            });
        }

        if self.notifications.webhook.enabled && self.notifications.webhook.url.trim().is_empty()
        {
            return Err(PvcwError::InvalidConfig {
                details: "notifications.webhook.url is required when the webhook is enabled"
                    .to_string(),
            });
        }

        if self.notifications.command.enabled
            && self.notifications.command.program.trim().is_empty()
        {
            return Err(PvcwError::InvalidConfig {
                details: "notifications.command.program is required when the hook is enabled"
                    .to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|error| PvcwError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.trim().parse::<bool>().map_err(|error| PvcwError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
