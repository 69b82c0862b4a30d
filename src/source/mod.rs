//! Claim transports and the feed that turns them into dispatcher events.
//!
//! A [`ClaimSource`] knows how to list claims and open a watch stream. The
//! feed driver in [`feed`] owns the source on its own thread, shapes the
//! stream with a [`feed::ClaimFeed`] (raw passthrough or informer cache),
//! and hands [`ClaimEvent`](crate::monitor::dispatcher::ClaimEvent)s to the
//! single dispatcher over a bounded channel.

pub mod backoff;
pub mod feed;
pub mod informer;
pub mod kubectl;
pub mod raw_watch;
pub mod replay;
pub mod wire;

use std::fmt;

use crate::core::errors::Result;
use crate::monitor::dispatcher::ClaimRecord;

/// A full listing of the claims currently visible to a source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimListing {
    pub records: Vec<ClaimRecord>,
    /// Position to resume a watch from, when the source has one.
    pub resource_version: Option<String>,
}

/// One item from a watch stream, before the feed adapter sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchRecord {
    Added(ClaimRecord),
    Modified(ClaimRecord),
    Deleted(ClaimRecord),
    /// Progress marker carrying only a resource version.
    Bookmark(String),
    /// Server-side error status delivered in-band.
    Error(String),
}

impl WatchRecord {
    /// Resource version this record moves the watch to, if any.
    #[must_use]
    pub fn resource_version(&self) -> Option<&str> {
        let version = match self {
            Self::Added(r) | Self::Modified(r) | Self::Deleted(r) => r.identity.as_str(),
            Self::Bookmark(v) => v.as_str(),
            Self::Error(_) => "",
        };
        (!version.is_empty()).then_some(version)
    }
}

pub(crate) type RecordIter = Box<dyn Iterator<Item = Result<WatchRecord>> + Send>;
pub(crate) type Stopper = Box<dyn FnOnce() + Send>;

/// A blocking stream of watch records.
///
/// Iteration blocks until the next record arrives. The end of iteration
/// means the server (or the transport) closed the watch.
pub struct WatchStream {
    records: RecordIter,
    stopper: Option<Stopper>,
}

impl WatchStream {
    /// Wrap an iterator with no way to interrupt it early.
    pub fn new<I>(records: I) -> Self
    where
        I: Iterator<Item = Result<WatchRecord>> + Send + 'static,
    {
        Self {
            records: Box::new(records),
            stopper: None,
        }
    }

    /// Register a callback that unblocks a pending `next()`.
    #[must_use]
    pub fn with_stopper<F>(mut self, stopper: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.stopper = Some(Box::new(stopper));
        self
    }

    /// Split into the record iterator and the stopper, so the iterator can
    /// move to a reader thread while the owner keeps the means to stop it.
    pub(crate) fn into_parts(self) -> (RecordIter, Option<Stopper>) {
        (self.records, self.stopper)
    }
}

impl Iterator for WatchStream {
    type Item = Result<WatchRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next()
    }
}

impl fmt::Debug for WatchStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchStream")
            .field("stoppable", &self.stopper.is_some())
            .finish_non_exhaustive()
    }
}

/// Something that can list claims and watch for changes.
pub trait ClaimSource: Send {
    /// Short name used in logs and transport errors.
    fn name(&self) -> &'static str;

    /// Fetch every claim in scope.
    fn list(&mut self) -> Result<ClaimListing>;

    /// Open a watch, resuming from `resource_version` when given.
    fn watch(&mut self, resource_version: Option<&str>) -> Result<WatchStream>;
}

impl<S: ClaimSource + ?Sized> ClaimSource for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn list(&mut self) -> Result<ClaimListing> {
        (**self).list()
    }

    fn watch(&mut self, resource_version: Option<&str>) -> Result<WatchStream> {
        (**self).watch(resource_version)
    }
}
