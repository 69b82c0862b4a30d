//! PVCW-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, PvcwError>;

/// Top-level error type for pvcwatch.
#[derive(Debug, Error)]
pub enum PvcwError {
    #[error("[PVCW-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[PVCW-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[PVCW-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[PVCW-2001] invalid quantity {input:?}: {details}")]
    InvalidQuantity { input: String, details: String },

    #[error("[PVCW-2101] transport fault in {source_name}: {details}")]
    TransportFault {
        source_name: &'static str,
        details: String,
    },

    #[error("[PVCW-2102] claim cache did not sync within {waited_ms}ms")]
    CacheSyncTimeout { waited_ms: u64 },

    #[error("[PVCW-2201] inconsistent delta for {key}: {details}")]
    InconsistentDelta { key: String, details: String },

    #[error("[PVCW-3001] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[PVCW-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[PVCW-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[PVCW-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl PvcwError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "PVCW-1001",
            Self::MissingConfig { .. } => "PVCW-1002",
            Self::ConfigParse { .. } => "PVCW-1003",
            Self::InvalidQuantity { .. } => "PVCW-2001",
            Self::TransportFault { .. } => "PVCW-2101",
            Self::CacheSyncTimeout { .. } => "PVCW-2102",
            Self::InconsistentDelta { .. } => "PVCW-2201",
            Self::Serialization { .. } => "PVCW-3001",
            Self::Io { .. } => "PVCW-3002",
            Self::ChannelClosed { .. } => "PVCW-3003",
            Self::Runtime { .. } => "PVCW-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportFault { .. }
                | Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::Runtime { .. }
        )
    }

    /// Whether the failure must stop the process when it happens at startup.
    ///
    /// Per-event failures (a malformed claim, a drifted delta) never stop the
    /// watch loop; they are logged and healed by the next full listing.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::MissingConfig { .. }
                | Self::ConfigParse { .. }
                | Self::CacheSyncTimeout { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for malformed capacity strings.
    #[must_use]
    pub fn invalid_quantity(input: &str, details: impl Into<String>) -> Self {
        Self::InvalidQuantity {
            input: input.to_string(),
            details: details.into(),
        }
    }

    /// Convenience constructor for transport-level faults.
    #[must_use]
    pub fn transport(source_name: &'static str, details: impl Into<String>) -> Self {
        Self::TransportFault {
            source_name,
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for PvcwError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for PvcwError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<PvcwError> {
        vec![
            PvcwError::InvalidConfig {
                details: String::new(),
            },
            PvcwError::MissingConfig {
                path: PathBuf::new(),
            },
            PvcwError::ConfigParse {
                context: "",
                details: String::new(),
            },
            PvcwError::invalid_quantity("", ""),
            PvcwError::transport("test", ""),
            PvcwError::CacheSyncTimeout { waited_ms: 0 },
            PvcwError::InconsistentDelta {
                key: String::new(),
                details: String::new(),
            },
            PvcwError::Serialization {
                context: "",
                details: String::new(),
            },
            PvcwError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            PvcwError::ChannelClosed { component: "" },
            PvcwError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = all_variants();
        let codes: Vec<&str> = errors.iter().map(PvcwError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn display_includes_code() {
        for err in all_variants() {
            let msg = err.to_string();
            assert!(
                msg.contains(err.code()),
                "display should contain error code: {msg}"
            );
        }
    }

    #[test]
    fn invalid_quantity_display_names_input() {
        let err = PvcwError::invalid_quantity("12Qi", "unknown suffix");
        let msg = err.to_string();
        assert!(msg.contains("\"12Qi\""), "{msg}");
        assert!(msg.contains("unknown suffix"), "{msg}");
    }

    #[test]
    fn fatal_and_retryable_are_disjoint() {
        for err in all_variants() {
            assert!(
                !(err.is_fatal() && err.is_retryable()),
                "{} is both fatal and retryable",
                err.code()
            );
        }
        assert!(PvcwError::CacheSyncTimeout { waited_ms: 1 }.is_fatal());
        assert!(PvcwError::transport("kubectl", "eof").is_retryable());
        assert!(!PvcwError::invalid_quantity("x", "y").is_fatal());
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: PvcwError = json_err.into();
        assert_eq!(err.code(), "PVCW-3001");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: PvcwError = toml_err.into();
        assert_eq!(err.code(), "PVCW-1003");
    }
}
