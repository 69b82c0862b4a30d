//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use pvc_watch::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, WatchMode};
pub use crate::core::errors::{PvcwError, Result};

// Monitor
pub use crate::monitor::aggregator::Aggregator;
pub use crate::monitor::dispatcher::{ClaimEvent, ClaimRecord, EventDispatcher, LedgerView};
pub use crate::monitor::quantity::Quantity;
pub use crate::monitor::report::ClaimReport;
pub use crate::monitor::store::{ClaimKey, ClaimStore};
pub use crate::monitor::threshold::{ThresholdAction, ThresholdMonitor, Transition};

// Sources
pub use crate::source::kubectl::KubectlSource;
pub use crate::source::replay::ReplaySource;
pub use crate::source::{ClaimSource, WatchRecord, WatchStream};

// Daemon
#[cfg(feature = "daemon")]
pub use crate::daemon::loop_main::{DaemonArgs, RunSummary, WatchDaemon};
