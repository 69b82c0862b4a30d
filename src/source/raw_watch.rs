//! Raw stream adapter: every change notification becomes a dispatcher
//! event as-is. Duplicates from a watch that replays current objects are
//! left to the dispatcher's identity check.

use crate::monitor::dispatcher::{ClaimEvent, ClaimRecord};
use crate::source::WatchRecord;
use crate::source::feed::ClaimFeed;

/// Passthrough adapter for long-lived watch streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawAdapter;

impl ClaimFeed for RawAdapter {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn on_listing(&mut self, records: Vec<ClaimRecord>) -> Vec<ClaimRecord> {
        records
    }

    fn on_record(&mut self, record: WatchRecord) -> Option<ClaimEvent> {
        match record {
            WatchRecord::Added(r) => Some(ClaimEvent::Added(r)),
            WatchRecord::Modified(r) => Some(ClaimEvent::Modified(r)),
            WatchRecord::Deleted(r) => Some(ClaimEvent::Deleted(r)),
            WatchRecord::Bookmark(_) | WatchRecord::Error(_) => None,
        }
    }
}
