#![forbid(unsafe_code)]

//! pvcwatch: keeps a running total of PersistentVolumeClaim capacity and
//! fires an action when it crosses a configured ceiling.
//!
//! The pipeline has three stages:
//! 1. **Source**: lists and watches claims (via `kubectl`, or recorded output)
//! 2. **Dispatcher**: the single writer that applies lifecycle events to the
//!    claim store and the running total
//! 3. **Threshold monitor**: edge-triggered detection, one action per crossing
//!
//! # Library usage
//!
//! ```rust,no_run
//! use pvc_watch::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use pvc_watch::core::config::Config;
//! use pvc_watch::monitor::quantity::Quantity;
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod logger;
pub mod monitor;
pub mod source;
