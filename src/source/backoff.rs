//! Reconnect delays for the feed: exponential with jitter, capped.

#![allow(missing_docs)]

use std::time::Duration;

use rand::Rng;

use crate::core::config::WatchConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffConfig {
    #[must_use]
    pub const fn from_watch(watch: &WatchConfig) -> Self {
        Self {
            initial: Duration::from_millis(watch.backoff_initial_ms),
            max: Duration::from_millis(watch.backoff_max_ms),
        }
    }

    /// Un-jittered delay for a 1-based attempt number.
    #[must_use]
    pub fn ceiling_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        self.initial.saturating_mul(1_u32 << shift).min(self.max)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::from_watch(&WatchConfig::default())
    }
}

/// Attempt counter that hands out successive delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
}

impl Backoff {
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Next delay, drawn uniformly from the upper half of the attempt's window.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        let window = self.config.ceiling_for_attempt(self.attempts);
        let millis = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        if millis < 2 {
            return window;
        }
        Duration::from_millis(rand::rng().random_range(millis / 2..=millis))
    }

    /// Forget past failures after a successful connect.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial_ms: u64, max_ms: u64) -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_millis(initial_ms),
            max: Duration::from_millis(max_ms),
        }
    }

    #[test]
    fn window_doubles_until_cap() {
        let cfg = config(100, 1_000);
        assert_eq!(cfg.ceiling_for_attempt(1), Duration::from_millis(100));
        assert_eq!(cfg.ceiling_for_attempt(2), Duration::from_millis(200));
        assert_eq!(cfg.ceiling_for_attempt(4), Duration::from_millis(800));
        assert_eq!(cfg.ceiling_for_attempt(5), Duration::from_millis(1_000));
        assert_eq!(cfg.ceiling_for_attempt(500), Duration::from_millis(1_000));
    }

    #[test]
    fn delays_stay_inside_jitter_band() {
        let cfg = config(100, 1_000);
        let mut backoff = Backoff::new(cfg);
        for attempt in 1..=8 {
            let delay = backoff.next_delay();
            let window = cfg.ceiling_for_attempt(attempt);
            assert!(delay <= window, "attempt {attempt}: {delay:?} > {window:?}");
            assert!(delay >= window / 2, "attempt {attempt}: {delay:?} < half");
        }
        assert_eq!(backoff.attempts(), 8);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new(config(100, 1_000));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.next_delay() <= Duration::from_millis(100));
    }

    #[test]
    fn tiny_windows_skip_jitter() {
        let mut backoff = Backoff::new(config(1, 1));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1));
    }
}
