//! Claim accounting engine: quantities, the keyed claim snapshot, the running
//! total, edge-triggered ceiling detection, and the dispatcher that applies
//! lifecycle events to all of them.

pub mod aggregator;
pub mod dispatcher;
pub mod quantity;
pub mod report;
pub mod store;
pub mod threshold;
