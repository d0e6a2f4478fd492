//! Conflict and resolution models

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// How a conflicting field is settled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Keep the locally edited value
    KeepLocal,
    /// Take the server's value
    #[default]
    KeepServer,
    /// Server value unless it is null, then the local value
    Merge,
}

impl ResolutionStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::KeepServer => "keep_server",
            Self::Merge => "merge",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "keep_local" | "local" => Ok(Self::KeepLocal),
            "keep_server" | "server" => Ok(Self::KeepServer),
            "merge" => Ok(Self::Merge),
            other => Err(Error::InvalidInput(format!(
                "unknown resolution strategy '{other}'"
            ))),
        }
    }
}

/// A single diverging field between a local change and the server record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    /// `"{change_id}_{field}"`
    pub id: String,
    pub entity: String,
    pub field: String,
    pub local_value: Value,
    pub server_value: Value,
    pub local_timestamp: i64,
    pub server_timestamp: i64,
}

/// A queued change whose payload diverges from the server on one or more fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictItem {
    /// Id of the owning queued change
    pub id: String,
    pub entity: String,
    pub entity_id: String,
    /// Display label
    pub entity_name: String,
    /// Never empty
    pub conflicts: Vec<FieldConflict>,
    pub local_timestamp: i64,
    pub server_timestamp: i64,
}

/// Final payload produced for a resolved conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedData {
    pub id: String,
    pub entity: String,
    pub data: Value,
    pub strategy: ResolutionStrategy,
}

/// One resolve call's outcome, kept for auto-resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictHistoryEntry {
    pub timestamp: i64,
    pub resolutions: Vec<ResolvedData>,
}

/// Strategy choices keyed by conflict item id or field conflict id
///
/// A field-level entry overrides the entry for its owning item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictDecision(HashMap<String, ResolutionStrategy>);

impl ConflictDecision {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty decision; resolves nothing
    pub fn cancelled() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, id: impl Into<String>, strategy: ResolutionStrategy) -> Self {
        self.insert(id, strategy);
        self
    }

    pub fn insert(&mut self, id: impl Into<String>, strategy: ResolutionStrategy) {
        self.0.insert(id.into(), strategy);
    }

    pub fn get(&self, id: &str) -> Option<ResolutionStrategy> {
        self.0.get(id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(String, ResolutionStrategy)> for ConflictDecision {
    fn from_iter<I: IntoIterator<Item = (String, ResolutionStrategy)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
