//! Kubernetes JSON shapes for persistent volume claims, lists, and watch events.
//!
//! Only the fields the watcher reads are modeled; everything else is ignored.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::io::Read;

use serde::Deserialize;

use crate::core::errors::{PvcwError, Result};
use crate::monitor::dispatcher::ClaimRecord;
use crate::monitor::store::ClaimKey;
use crate::source::{ClaimListing, WatchRecord};

/// Capacity used when a claim has no storage request.
pub const MISSING_CAPACITY: &str = "0";
/// Phase used when the API has not reported one yet.
pub const MISSING_PHASE: &str = "Pending";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: Option<String>,
    pub resource_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResourceRequirements {
    pub requests: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClaimSpec {
    pub resources: ResourceRequirements,
    pub volume_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClaimStatus {
    pub phase: Option<String>,
}

/// `PersistentVolumeClaim`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClaimObject {
    pub metadata: ObjectMeta,
    pub spec: ClaimSpec,
    pub status: ClaimStatus,
}

impl ClaimObject {
    /// Map to a dispatcher record. Absent namespace, capacity, or phase fall
    /// back to `default`, `0`, and `Pending`.
    #[must_use]
    pub fn into_record(self) -> ClaimRecord {
        let namespace = self
            .metadata
            .namespace
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| "default".to_string());
        let mut requests = self.spec.resources.requests;
        let capacity = requests
            .remove("storage")
            .unwrap_or_else(|| MISSING_CAPACITY.to_string());
        let phase = self
            .status
            .phase
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| MISSING_PHASE.to_string());
        ClaimRecord::new(
            ClaimKey::new(namespace, self.metadata.name),
            capacity,
            phase,
            self.metadata.resource_version.unwrap_or_default(),
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListMeta {
    pub resource_version: Option<String>,
}

/// `PersistentVolumeClaimList` (or kubectl's generic `List`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClaimList {
    pub metadata: ListMeta,
    pub items: Vec<ClaimObject>,
}

impl ClaimList {
    #[must_use]
    pub fn into_listing(self) -> ClaimListing {
        ClaimListing {
            records: self.items.into_iter().map(ClaimObject::into_record).collect(),
            resource_version: self.metadata.resource_version.filter(|rv| !rv.is_empty()),
        }
    }
}

/// Parse a list document.
pub fn parse_list(raw: &str) -> Result<ClaimListing> {
    let list: ClaimList = serde_json::from_str(raw)?;
    Ok(list.into_listing())
}

/// One watch notification as emitted by the API server or `kubectl --output-watch-events`.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub object: serde_json::Value,
}

impl WatchEvent {
    /// Convert to a typed record. Unknown event types are a transport fault.
    pub fn into_record(self) -> Result<WatchRecord> {
        let kind = self.kind.to_ascii_uppercase();
        match kind.as_str() {
            "ADDED" | "MODIFIED" | "DELETED" => {
                let object: ClaimObject = serde_json::from_value(self.object)?;
                let record = object.into_record();
                Ok(match kind.as_str() {
                    "ADDED" => WatchRecord::Added(record),
                    "MODIFIED" => WatchRecord::Modified(record),
                    _ => WatchRecord::Deleted(record),
                })
            }
            "BOOKMARK" => {
                let version = self
                    .object
                    .pointer("/metadata/resourceVersion")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(WatchRecord::Bookmark(version))
            }
            "ERROR" => {
                let message = self
                    .object
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("watch error without message")
                    .to_string();
                Ok(WatchRecord::Error(message))
            }
            other => Err(PvcwError::transport(
                "wire",
                format!("unknown watch event type {other:?}"),
            )),
        }
    }
}

/// Decode a concatenated stream of watch events (pretty-printed or one per
/// line). Iteration stops after the first undecodable event.
pub fn decode_watch_stream<R: Read>(reader: R) -> impl Iterator<Item = Result<WatchRecord>> {
    let mut failed = false;
    serde_json::Deserializer::from_reader(reader)
        .into_iter::<WatchEvent>()
        .map_while(move |item| {
            if failed {
                return None;
            }
            match item {
                Ok(event) => Some(event.into_record()),
                Err(error) => {
                    failed = true;
                    Some(Err(error.into()))
                }
            }
        })
}
