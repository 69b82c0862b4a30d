//! Running total of claimed capacity.

#![allow(missing_docs)]

use crate::monitor::quantity::Quantity;

/// Result of applying one delta to the running total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaOutcome {
    pub previous: Quantity,
    pub total: Quantity,
    /// Amount discarded to keep the total from going below zero.
    pub clamped: Option<Quantity>,
}

impl DeltaOutcome {
    #[must_use]
    pub const fn was_clamped(&self) -> bool {
        self.clamped.is_some()
    }
}

/// Owns the running total. Pure bookkeeping: no thresholds, no logging.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    total: Quantity,
}

impl Aggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn total(&self) -> Quantity {
        self.total
    }

    /// Add a signed delta. A result below zero is clamped to zero and the
    /// shortfall reported, since a negative aggregate is never meaningful.
    pub fn apply_delta(&mut self, delta: Quantity) -> DeltaOutcome {
        let previous = self.total;
        let next = previous + delta;
        if next.is_negative() {
            self.total = Quantity::from_milli(0, next.format());
            DeltaOutcome {
                previous,
                total: self.total,
                clamped: Some(-next),
            }
        } else {
            self.total = next;
            DeltaOutcome {
                previous,
                total: next,
                clamped: None,
            }
        }
    }

    pub fn add(&mut self, amount: Quantity) -> DeltaOutcome {
        self.apply_delta(amount)
    }

    pub fn subtract(&mut self, amount: Quantity) -> DeltaOutcome {
        self.apply_delta(-amount)
    }

    /// Replace the total with one re-derived from a full set of capacities.
    pub fn rebase<'a>(&mut self, capacities: impl IntoIterator<Item = &'a Quantity>) -> DeltaOutcome {
        let previous = self.total;
        let derived: Quantity = capacities.into_iter().sum();
        self.total = if derived.is_zero() {
            Quantity::from_milli(0, previous.format())
        } else {
            derived
        };
        DeltaOutcome {
            previous,
            total: self.total,
            clamped: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        Quantity::parse(s).unwrap()
    }

    #[test]
    fn starts_at_zero() {
        assert!(Aggregator::new().total().is_zero());
    }

    #[test]
    fn add_and_subtract_track_total() {
        let mut agg = Aggregator::new();
        let first = agg.add(q("100Gi"));
        assert!(first.previous.is_zero());
        assert_eq!(first.total, q("100Gi"));
        agg.add(q("150Gi"));
        let out = agg.subtract(q("100Gi"));
        assert_eq!(out.previous, q("250Gi"));
        assert_eq!(out.total, q("150Gi"));
        assert_eq!(out.total.to_string(), "150Gi");
        assert!(!out.was_clamped());
    }

    #[test]
    fn negative_delta_applies() {
        let mut agg = Aggregator::new();
        agg.add(q("10Gi"));
        let out = agg.apply_delta(-q("4Gi"));
        assert_eq!(out.total, q("6Gi"));
    }

    #[test]
    fn clamps_instead_of_going_negative() {
        let mut agg = Aggregator::new();
        agg.add(q("5Gi"));
        let out = agg.subtract(q("8Gi"));
        assert!(out.total.is_zero());
        assert_eq!(out.clamped, Some(q("3Gi")));
        assert!(agg.total().is_zero());
    }

    #[test]
    fn rebase_replaces_drifted_total() {
        let mut agg = Aggregator::new();
        agg.add(q("999Gi"));
        let capacities = [q("1Gi"), q("2Gi")];
        let out = agg.rebase(capacities.iter());
        assert_eq!(out.previous, q("999Gi"));
        assert_eq!(out.total, q("3Gi"));
        assert_eq!(agg.total(), q("3Gi"));
    }

    #[test]
    fn rebase_to_empty_is_zero() {
        let mut agg = Aggregator::new();
        agg.add(q("1Gi"));
        let out = agg.rebase(std::iter::empty::<&Quantity>());
        assert!(out.total.is_zero());
    }
}
