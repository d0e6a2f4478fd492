//! Pending change model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for a queued change, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeId(Uuid);

impl ChangeId {
    /// Create a new unique change ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ChangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChangeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of local mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl ChangeType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown change type '{other}'"))),
        }
    }
}

/// Lifecycle state of a queued change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Pending,
    Syncing,
    Synced,
    Conflict,
    Failed,
}

impl ChangeStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Conflict => "conflict",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "conflict" => Ok(Self::Conflict),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!("unknown change status '{other}'"))),
        }
    }
}

/// A queued, not-yet-confirmed local mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    /// Unique identifier, stable for the item's lifetime
    pub id: ChangeId,
    /// Mutation kind
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// Logical collection name (e.g. `machines`)
    pub entity: String,
    /// Identifier within `entity`; provisional for client-side creates
    pub entity_id: String,
    /// Full or partial field set of the mutation
    pub payload: Value,
    /// Local wall-clock time of the edit (Unix ms)
    pub timestamp: i64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub status: ChangeStatus,
    /// Last transient error reported for this change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Server record observed when a conflict was detected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_record: Option<Value>,
}

impl PendingChange {
    /// Whether the change still has retry budget left
    pub const fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Whether the change is eligible for the next drain
    pub const fn is_drainable(&self) -> bool {
        matches!(self.status, ChangeStatus::Pending)
    }

    /// Display label: `name`, then `title`, then `"{entity} #{entity_id}"`
    pub fn display_name(&self) -> String {
        ["name", "title"]
            .iter()
            .find_map(|key| self.payload.get(*key).and_then(Value::as_str))
            .map_or_else(
                || format!("{} #{}", self.entity, self.entity_id),
                str::to_string,
            )
    }
}

/// Input for enqueueing a new local mutation
#[derive(Debug, Clone, PartialEq)]
pub struct NewChange {
    pub change_type: ChangeType,
    pub entity: String,
    pub entity_id: Option<String>,
    pub payload: Value,
}

impl NewChange {
    pub fn new(change_type: ChangeType, entity: impl Into<String>, payload: Value) -> Self {
        Self {
            change_type,
            entity: entity.into(),
            entity_id: None,
            payload,
        }
    }

    pub fn create(entity: impl Into<String>, payload: Value) -> Self {
        Self::new(ChangeType::Create, entity, payload)
    }

    pub fn update(entity: impl Into<String>, payload: Value) -> Self {
        Self::new(ChangeType::Update, entity, payload)
    }

    pub fn delete(entity: impl Into<String>, payload: Value) -> Self {
        Self::new(ChangeType::Delete, entity, payload)
    }

    /// Set the target entity id explicitly
    #[must_use]
    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Build the queued change
    ///
    /// The entity id comes from [`Self::with_entity_id`], then `payload.id`.
    /// Creates without either get a provisional UUID v7; updates and deletes
    /// without an id are rejected.
    pub fn into_pending(self, max_retries: u32, now_ms: i64) -> Result<PendingChange> {
        let entity = self.entity.trim().to_string();
        if entity.is_empty() {
            return Err(Error::InvalidInput("entity must not be empty".into()));
        }
        if !(self.payload.is_object() || self.payload.is_null()) {
            return Err(Error::InvalidInput("payload must be a JSON object".into()));
        }

        let entity_id = self
            .entity_id
            .and_then(crate::util::non_blank)
            .or_else(|| payload_id(&self.payload));

        let entity_id = match (entity_id, self.change_type) {
            (Some(id), _) => id,
            (None, ChangeType::Create) => Uuid::now_v7().to_string(),
            (None, change_type) => {
                return Err(Error::InvalidInput(format!(
                    "{change_type} on '{entity}' requires an entity id"
                )));
            }
        };

        Ok(PendingChange {
            id: ChangeId::new(),
            change_type: self.change_type,
            entity,
            entity_id,
            payload: self.payload,
            timestamp: now_ms,
            retry_count: 0,
            max_retries,
            status: ChangeStatus::Pending,
            last_error: None,
            server_record: None,
        })
    }
}

fn payload_id(payload: &Value) -> Option<String> {
    match payload.get("id")? {
        Value::String(id) => crate::util::non_blank(id),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
