//! Point-in-time claim report: the table printed at startup, on demand, and
//! on the periodic report timer.

#![allow(missing_docs)]

use std::fmt::Write as _;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::monitor::quantity::Quantity;
use crate::monitor::store::Claim;

const RULE: &str = "-----------------------------";

/// One table row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimRow {
    pub namespace: String,
    pub name: String,
    pub phase: String,
    pub capacity: Quantity,
}

impl From<Claim> for ClaimRow {
    fn from(claim: Claim) -> Self {
        Self {
            namespace: claim.key.namespace,
            name: claim.key.name,
            phase: claim.phase,
            capacity: claim.capacity,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimReport {
    pub generated_at: String,
    pub claims: Vec<ClaimRow>,
    pub total: Quantity,
    pub ceiling: Quantity,
    pub over_ceiling: bool,
    pub utilization_pct: Option<f64>,
}

impl ClaimReport {
    #[must_use]
    pub fn new(claims: Vec<Claim>, total: Quantity, ceiling: Quantity) -> Self {
        Self {
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            claims: claims.into_iter().map(ClaimRow::from).collect(),
            total,
            ceiling,
            over_ceiling: total > ceiling,
            utilization_pct: total.percent_of(&ceiling),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// True when the claims come from more than one namespace.
    #[must_use]
    pub fn spans_namespaces(&self) -> bool {
        self.claims
            .split_first()
            .is_some_and(|(first, rest)| rest.iter().any(|row| row.namespace != first.namespace))
    }

    /// Render the fixed-width listing.
    ///
    /// Names longer than the column keep their full text and push the row
    /// out, same as `%-32s` would. A listing across namespaces names each
    /// claim as `namespace/name` so equal names stay distinguishable.
    #[must_use]
    pub fn render_table(&self) -> String {
        let qualify = self.spans_namespaces();
        let mut out = String::new();
        if self.claims.is_empty() {
            out.push_str("No claims found\n");
        } else {
            out.push_str("--- PVCs ----\n");
            let _ = writeln!(out, "{:<32}{:<8}{:<8}", "NAME", "STATUS", "CAPACITY");
            for row in &self.claims {
                let name = if qualify {
                    format!("{}/{}", row.namespace, row.name)
                } else {
                    row.name.clone()
                };
                let _ = writeln!(
                    out,
                    "{:<32}{:<8}{:<8}",
                    name,
                    row.phase,
                    row.capacity.to_string()
                );
            }
            out.push_str(RULE);
            out.push('\n');
            let _ = writeln!(out, "Total capacity claimed: {}", self.total);
            out.push_str(RULE);
            out.push('\n');
        }
        out.push_str(&self.utilization_line());
        out.push('\n');
        out
    }

    /// `At NN.N% claim capacity (total/ceiling)`.
    #[must_use]
    pub fn utilization_line(&self) -> String {
        match self.utilization_pct {
            Some(pct) => format!(
                "At {pct:.1}% claim capacity ({}/{})",
                self.total, self.ceiling
            ),
            None => format!("At {} claimed (no ceiling set)", self.total),
        }
    }
}
