//! Edge-triggered ceiling detection.
//!
//! Only the crossing itself is notable: a total that stays above the ceiling
//! across many events fires once on the way up and once on the way back down.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::monitor::quantity::Quantity;

/// Change in the over-ceiling state caused by one total update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    None,
    RoseAboveCeiling,
    FellToOrBelowCeiling,
}

impl Transition {
    /// Classify a total update against the ceiling.
    #[must_use]
    pub fn classify(previous: &Quantity, current: &Quantity, ceiling: &Quantity) -> Self {
        match (previous > ceiling, current > ceiling) {
            (false, true) => Self::RoseAboveCeiling,
            (true, false) => Self::FellToOrBelowCeiling,
            _ => Self::None,
        }
    }

    #[must_use]
    pub const fn is_crossing(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::RoseAboveCeiling => "rose_above_ceiling",
            Self::FellToOrBelowCeiling => "fell_to_or_below_ceiling",
        })
    }
}

/// Payload handed to the action callback on each crossing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdAlert {
    pub transition: Transition,
    pub current_total: Quantity,
    pub ceiling: Quantity,
}

impl ThresholdAlert {
    #[must_use]
    pub fn utilization_pct(&self) -> Option<f64> {
        self.current_total.percent_of(&self.ceiling)
    }
}

/// Action invoked synchronously on every ceiling crossing.
///
/// Fire-and-forget: the monitor does not retry and ignores whatever the
/// action does with the alert.
pub trait ThresholdAction: Send {
    fn on_transition(&mut self, alert: &ThresholdAlert);
}

impl<F> ThresholdAction for F
where
    F: FnMut(&ThresholdAlert) + Send,
{
    fn on_transition(&mut self, alert: &ThresholdAlert) {
        self(alert);
    }
}

/// Action that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAction;

impl ThresholdAction for NoAction {
    fn on_transition(&mut self, _alert: &ThresholdAlert) {}
}

/// Holds the ceiling and the over-ceiling flag, and fires the action on edges.
pub struct ThresholdMonitor {
    ceiling: Quantity,
    over: bool,
    crossings: u64,
    action: Box<dyn ThresholdAction>,
}

impl ThresholdMonitor {
    #[must_use]
    pub fn new(ceiling: Quantity, action: Box<dyn ThresholdAction>) -> Self {
        Self {
            ceiling,
            over: false,
            crossings: 0,
            action,
        }
    }

    #[must_use]
    pub const fn ceiling(&self) -> Quantity {
        self.ceiling
    }

    /// Whether the last observed total was above the ceiling.
    #[must_use]
    pub const fn is_over(&self) -> bool {
        self.over
    }

    /// Number of crossings fired so far.
    #[must_use]
    pub const fn crossings(&self) -> u64 {
        self.crossings
    }

    /// Observe a total update and fire the action if it crossed the ceiling.
    pub fn observe(&mut self, previous: &Quantity, current: &Quantity) -> Transition {
        let transition = Transition::classify(previous, current, &self.ceiling);
        match transition {
            Transition::RoseAboveCeiling => self.over = true,
            Transition::FellToOrBelowCeiling => self.over = false,
            Transition::None => return transition,
        }
        self.crossings += 1;
        let alert = ThresholdAlert {
            transition,
            current_total: *current,
            ceiling: self.ceiling,
        };
        self.action.on_transition(&alert);
        transition
    }
}

impl fmt::Debug for ThresholdMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThresholdMonitor")
            .field("ceiling", &self.ceiling)
            .field("over", &self.over)
            .field("crossings", &self.crossings)
            .finish_non_exhaustive()
    }
}
