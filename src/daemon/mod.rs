//! Daemon subsystem: the watch loop, signal handling, and threshold
//! notifications.

#[cfg(feature = "daemon")]
pub mod loop_main;
pub mod notifications;
#[cfg(feature = "daemon")]
pub mod signals;
