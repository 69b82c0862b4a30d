//! Signal handling: SIGTERM/SIGINT graceful shutdown, SIGHUP forced relist,
//! SIGUSR1 immediate claim report.
//!
//! Uses `signal-hook` flag registration. The watch loop polls the flags on
//! every wake-up rather than blocking on signals.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};

/// Signal state shared between the OS handlers, the watch loop, and anything
/// else that wants to stop or poke it.
#[derive(Clone, Debug)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    resync_flag: Arc<AtomicBool>,
    report_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register OS signal hooks.
    ///
    /// Registration is best-effort; failures are logged to stderr but not fatal.
    pub fn new() -> Self {
        let handler = Self::detached();
        handler.register_signals();
        handler
    }

    /// Create a handler that only reacts to programmatic requests.
    pub fn detached() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            resync_flag: Arc::new(AtomicBool::new(false)),
            report_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Check and clear a pending relist request.
    pub fn should_resync(&self) -> bool {
        self.resync_flag.swap(false, Ordering::Relaxed)
    }

    /// Check and clear a pending report request.
    pub fn should_report(&self) -> bool {
        self.report_flag.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_resync(&self) {
        self.resync_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_report(&self) {
        self.report_flag.store(true, Ordering::Relaxed);
    }

    /// The raw shutdown flag, for threads that poll it directly.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_flag)
    }

    fn register_signals(&self) {
        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[PVCW-SIGNAL] failed to register SIGTERM: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[PVCW-SIGNAL] failed to register SIGINT: {e}");
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGHUP, SIGUSR1};
            if let Err(e) = signal_hook::flag::register(SIGHUP, Arc::clone(&self.resync_flag)) {
                eprintln!("[PVCW-SIGNAL] failed to register SIGHUP: {e}");
            }
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.report_flag)) {
                eprintln!("[PVCW-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
