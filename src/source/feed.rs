//! Feed driver: owns a [`ClaimSource`] on a dedicated thread and turns its
//! listings and watch records into ordered [`ClaimEvent`]s.
//!
//! ```text
//!   ClaimSource ──list──► sync gate (baseline, exactly once)
//!        │
//!        └──watch──► pvcw-watch reader ──► pvcw-feed ──ClaimFeed──► events queue
//!                                              ▲
//!                         resync requests ─────┘
//! ```
//!
//! The baseline listing travels on its own one-shot channel so the consumer
//! can apply it before touching any queued live event.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded, select};

use crate::core::config::{WatchConfig, WatchMode};
use crate::core::errors::{PvcwError, Result};
use crate::monitor::dispatcher::{ClaimEvent, ClaimRecord};
use crate::source::backoff::{Backoff, BackoffConfig};
use crate::source::informer::InformerAdapter;
use crate::source::raw_watch::RawAdapter;
use crate::source::{ClaimListing, ClaimSource, RecordIter, WatchRecord};

/// How often blocked waits wake up to check the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ──────────────────── adapter seam ────────────────────

/// Shapes raw watch traffic into dispatcher events.
///
/// Implementations run on the feed thread only.
pub trait ClaimFeed: Send {
    fn name(&self) -> &'static str;

    /// Accept a full listing and return the records to deliver as the
    /// baseline or as a `Sync` event.
    fn on_listing(&mut self, records: Vec<ClaimRecord>) -> Vec<ClaimRecord>;

    /// Accept one change notification. `None` suppresses it.
    fn on_record(&mut self, record: WatchRecord) -> Option<ClaimEvent>;

    /// Period for [`ClaimFeed::on_tick`], when the adapter wants one.
    fn tick_interval(&self) -> Option<Duration> {
        None
    }

    fn on_tick(&mut self) -> Option<ClaimEvent> {
        None
    }
}

/// Build the adapter for a watch mode.
#[must_use]
pub fn adapter_for(mode: WatchMode, resync_interval: Duration) -> Box<dyn ClaimFeed> {
    match mode {
        WatchMode::Raw => Box::new(RawAdapter),
        WatchMode::Informer => Box::new(InformerAdapter::new(resync_interval)),
    }
}

// ──────────────────── options + handle ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedOptions {
    pub mode: WatchMode,
    pub queue_capacity: usize,
    /// Re-list and re-watch after the stream ends. Off for finite replays.
    pub reconnect: bool,
    pub backoff: BackoffConfig,
    pub resync_interval: Duration,
}

impl FeedOptions {
    #[must_use]
    pub fn from_watch(watch: &WatchConfig) -> Self {
        Self {
            mode: watch.mode,
            queue_capacity: watch.queue_capacity.max(1),
            reconnect: watch.reconnect,
            backoff: BackoffConfig::from_watch(watch),
            resync_interval: Duration::from_millis(watch.resync_interval_ms.max(1)),
        }
    }
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self::from_watch(&WatchConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedControl {
    Resync,
}

/// Consumer side of a running feed.
#[derive(Debug)]
pub struct FeedHandle {
    events: Receiver<ClaimEvent>,
    sync: Receiver<Result<Vec<ClaimRecord>>>,
    control: Sender<FeedControl>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl FeedHandle {
    /// Live events, in delivery order. Disconnects when the feed ends.
    #[must_use]
    pub const fn events(&self) -> &Receiver<ClaimEvent> {
        &self.events
    }

    /// Block until the baseline listing is available.
    ///
    /// Returns `Ok(None)` when `abort` turns true first.
    pub fn wait_for_sync<F>(&self, timeout: Duration, abort: F) -> Result<Option<Vec<ClaimRecord>>>
    where
        F: Fn() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if abort() {
                return Ok(None);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(PvcwError::CacheSyncTimeout {
                    waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            match self.sync.recv_timeout((deadline - now).min(POLL_INTERVAL)) {
                Ok(Ok(records)) => return Ok(Some(records)),
                Ok(Err(error)) => return Err(error),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(PvcwError::ChannelClosed { component: "feed" });
                }
            }
        }
    }

    /// Ask the feed for a fresh full listing. Requests coalesce while one is
    /// pending; returns false only when the feed has gone away.
    pub fn request_resync(&self) -> bool {
        match self.control.try_send(FeedControl::Resync) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop the feed thread and wait for it.
    pub fn stop(self) {
        let Self {
            events,
            sync,
            control,
            stop,
            join,
        } = self;
        stop.store(true, Ordering::Relaxed);
        drop(events);
        drop(sync);
        drop(control);
        if let Some(join) = join
            && join.join().is_err()
        {
            eprintln!("[PVCW-FEED] feed thread panicked");
        }
    }
}

/// Start the feed thread for `source`.
pub fn start_feed(source: Box<dyn ClaimSource>, options: FeedOptions) -> Result<FeedHandle> {
    let (event_tx, event_rx) = bounded(options.queue_capacity.max(1));
    let (sync_tx, sync_rx) = bounded(1);
    let (control_tx, control_rx) = bounded(1);
    let stop = Arc::new(AtomicBool::new(false));

    let driver = FeedDriver {
        adapter: adapter_for(options.mode, options.resync_interval),
        source,
        events: event_tx,
        control: control_rx,
        stop: Arc::clone(&stop),
        reconnect: options.reconnect,
        backoff: Backoff::new(options.backoff),
        resource_version: None,
        queue_capacity: options.queue_capacity.max(1),
    };

    let join = thread::Builder::new()
        .name("pvcw-feed".to_string())
        .spawn(move || driver.run(&sync_tx))
        .map_err(|e| PvcwError::Runtime {
            details: format!("failed to spawn feed thread: {e}"),
        })?;

    Ok(FeedHandle {
        events: event_rx,
        sync: sync_rx,
        control: control_tx,
        stop,
        join: Some(join),
    })
}

// ──────────────────── driver ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct FeedDriver {
    source: Box<dyn ClaimSource>,
    adapter: Box<dyn ClaimFeed>,
    events: Sender<ClaimEvent>,
    control: Receiver<FeedControl>,
    stop: Arc<AtomicBool>,
    reconnect: bool,
    backoff: Backoff,
    resource_version: Option<String>,
    queue_capacity: usize,
}

impl FeedDriver {
    fn run(mut self, sync: &Sender<Result<Vec<ClaimRecord>>>) {
        let baseline = match self.initial_listing() {
            Some(Ok(records)) => records,
            Some(Err(error)) => {
                let _ = sync.send(Err(error));
                return;
            }
            None => return,
        };
        if sync.send(Ok(baseline)).is_err() {
            return;
        }

        loop {
            if self.watch_once() == Flow::Stop || !self.reconnect {
                return;
            }
            if self.relist_with_backoff() == Flow::Stop {
                return;
            }
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Sleep in short slices; false when stopped meanwhile.
    fn pause(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        while !self.stopped() {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(POLL_INTERVAL));
        }
        false
    }

    fn initial_listing(&mut self) -> Option<Result<Vec<ClaimRecord>>> {
        loop {
            if self.stopped() {
                return None;
            }
            match self.source.list() {
                Ok(listing) => {
                    self.backoff.reset();
                    return Some(Ok(self.accept_listing(listing)));
                }
                Err(error) if self.reconnect && error.is_retryable() => {
                    let delay = self.backoff.next_delay();
                    eprintln!(
                        "[PVCW-FEED] initial {} listing failed (attempt {}), retrying in {}ms: {error}",
                        self.source.name(),
                        self.backoff.attempts(),
                        delay.as_millis()
                    );
                    if !self.pause(delay) {
                        return None;
                    }
                }
                Err(error) => return Some(Err(error)),
            }
        }
    }

    fn accept_listing(&mut self, listing: ClaimListing) -> Vec<ClaimRecord> {
        if listing.resource_version.is_some() {
            self.resource_version = listing.resource_version;
        }
        self.adapter.on_listing(listing.records)
    }

    fn emit(&self, event: ClaimEvent) -> Flow {
        if self.events.send(event).is_ok() {
            Flow::Continue
        } else {
            Flow::Stop
        }
    }

    fn fault(&self, details: impl Into<String>) -> Flow {
        self.emit(ClaimEvent::Error(PvcwError::transport(
            self.source.name(),
            details,
        )))
    }

    /// One list attempt delivered as `Sync`; a failure is reported as a fault
    /// and returned as `Err` so the caller can fall back to the backoff path.
    fn relist(&mut self) -> std::result::Result<Flow, Flow> {
        match self.source.list() {
            Ok(listing) => {
                let records = self.accept_listing(listing);
                Ok(self.emit(ClaimEvent::Sync(records)))
            }
            Err(error) => Err(self.emit(ClaimEvent::Error(error))),
        }
    }

    fn relist_with_backoff(&mut self) -> Flow {
        loop {
            let delay = self.backoff.next_delay();
            if !self.pause(delay) {
                return Flow::Stop;
            }
            // Requests queued so far are satisfied by this listing.
            while self.control.try_recv().is_ok() {}
            match self.relist() {
                Ok(flow) => {
                    self.backoff.reset();
                    return flow;
                }
                Err(Flow::Stop) => return Flow::Stop,
                Err(Flow::Continue) => {}
            }
        }
    }

    /// Run one watch until it ends, faults, or the feed stops.
    fn watch_once(&mut self) -> Flow {
        let stream = match self.source.watch(self.resource_version.as_deref()) {
            Ok(stream) => stream,
            Err(error) => {
                return match self.emit(ClaimEvent::Error(error)) {
                    Flow::Stop => Flow::Stop,
                    Flow::Continue if self.reconnect => Flow::Continue,
                    Flow::Continue => Flow::Stop,
                };
            }
        };
        let (records, stopper) = stream.into_parts();
        let incoming = match spawn_watch_reader(records, self.queue_capacity) {
            Ok(rx) => rx,
            Err(error) => {
                if let Some(stopper) = stopper {
                    stopper();
                }
                return self.emit(ClaimEvent::Error(error));
            }
        };
        let control = self.control.clone();
        let ticker = self
            .adapter
            .tick_interval()
            .map_or_else(crossbeam_channel::never, crossbeam_channel::tick);

        let flow = loop {
            if self.stopped() {
                break Flow::Stop;
            }
            select! {
                recv(incoming) -> msg => match msg {
                    Ok(Ok(WatchRecord::Error(message))) => break self.fault(message),
                    Ok(Ok(record)) => {
                        if let Some(version) = record.resource_version() {
                            self.resource_version = Some(version.to_string());
                        }
                        if let Some(event) = self.adapter.on_record(record)
                            && self.emit(event) == Flow::Stop
                        {
                            break Flow::Stop;
                        }
                    }
                    Ok(Err(error)) => break self.emit(ClaimEvent::Error(error)),
                    Err(_) if self.reconnect => break self.fault("watch stream ended"),
                    Err(_) => break Flow::Continue,
                },
                recv(control) -> msg => match msg {
                    Ok(FeedControl::Resync) => match self.relist() {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Stop) | Err(Flow::Stop) => break Flow::Stop,
                        Err(Flow::Continue) => break Flow::Continue,
                    },
                    Err(_) => break Flow::Stop,
                },
                recv(ticker) -> _ => {
                    if let Some(event) = self.adapter.on_tick()
                        && self.emit(event) == Flow::Stop
                    {
                        break Flow::Stop;
                    }
                }
                default(POLL_INTERVAL) => {}
            }
        };

        if let Some(stopper) = stopper {
            stopper();
        }
        flow
    }
}

/// Move a blocking record iterator onto its own thread.
fn spawn_watch_reader(records: RecordIter, capacity: usize) -> Result<Receiver<Result<WatchRecord>>> {
    let (tx, rx) = bounded(capacity);
    thread::Builder::new()
        .name("pvcw-watch".to_string())
        .spawn(move || {
            for item in records {
                if tx.send(item).is_err() {
                    break;
                }
            }
        })
        .map_err(|e| PvcwError::Runtime {
            details: format!("failed to spawn watch reader: {e}"),
        })?;
    Ok(rx)
}
