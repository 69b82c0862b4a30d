//! Keyed snapshot of known claims.
//!
//! Single writer: only the event dispatcher mutates a [`ClaimStore`]. Readers
//! take point-in-time copies through [`ClaimStore::list`].

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::monitor::quantity::Quantity;

/// Namespace-scoped claim identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClaimKey {
    pub namespace: String,
    pub name: String,
}

impl ClaimKey {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `namespace/name`; a bare `name` lands in the `default` namespace.
    #[must_use]
    pub fn from_qualified(raw: &str) -> Self {
        match raw.split_once('/') {
            Some((namespace, name)) => Self::new(namespace, name),
            None => Self::new("default", raw),
        }
    }
}

impl fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A storage claim as last observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub key: ClaimKey,
    /// Requested capacity.
    pub capacity: Quantity,
    /// Lifecycle phase (`Pending`, `Bound`, `Lost`); informational only.
    pub phase: String,
    /// Opaque change marker (the API resource version).
    pub identity: String,
}

impl Claim {
    /// Whether `other` differs in a way that matters to the aggregate or the display.
    #[must_use]
    pub fn differs_materially(&self, other: &Self) -> bool {
        self.capacity != other.capacity || self.phase != other.phase
    }
}

/// Ordered map of claim key to claim.
#[derive(Debug, Clone, Default)]
pub struct ClaimStore {
    claims: BTreeMap<ClaimKey, Claim>,
}

impl ClaimStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a claim, returning the previously stored capacity.
    ///
    /// `None` means the key was unseen. A claim whose capacity and phase match
    /// the stored one leaves the store untouched apart from its identity
    /// marker, and reports the stored capacity so the caller's delta is zero.
    pub fn upsert(&mut self, claim: Claim) -> Option<Quantity> {
        match self.claims.get_mut(&claim.key) {
            None => {
                self.claims.insert(claim.key.clone(), claim);
                None
            }
            Some(existing) if !existing.differs_materially(&claim) => {
                existing.identity = claim.identity;
                Some(existing.capacity)
            }
            Some(existing) => {
                let previous = existing.capacity;
                *existing = claim;
                Some(previous)
            }
        }
    }

    /// Remove a claim, returning its capacity; unknown keys are a no-op.
    pub fn remove(&mut self, key: &ClaimKey) -> Option<Quantity> {
        self.claims.remove(key).map(|claim| claim.capacity)
    }

    #[must_use]
    pub fn get(&self, key: &ClaimKey) -> Option<&Claim> {
        self.claims.get(key)
    }

    /// Copy of all claims ordered by key.
    #[must_use]
    pub fn list(&self) -> Vec<Claim> {
        self.claims.values().cloned().collect()
    }

    /// Iterate stored claims in key order without copying.
    pub fn iter(&self) -> impl Iterator<Item = &Claim> {
        self.claims.values()
    }

    /// Keys in key order.
    pub fn keys(&self) -> impl Iterator<Item = &ClaimKey> {
        self.claims.keys()
    }

    /// Sum of all stored capacities, derived from scratch.
    #[must_use]
    pub fn derived_total(&self) -> Quantity {
        self.claims.values().map(|claim| &claim.capacity).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}
