//! Field-level conflict detection between a queued change and a server record

use serde_json::Value;

use crate::models::{ConflictItem, FieldConflict, PendingChange};

/// Fields that identify a record or carry bookkeeping, never user edits
const IGNORED_FIELDS: &[&str] = &["id", "createdAt", "created_at", "updatedAt", "updated_at"];

/// Fields consulted, in order, for the server's last-write time
const SERVER_TIMESTAMP_FIELDS: &[&str] = &["updatedAt", "updated_at", "timestamp"];

/// Compare a local change against the server's current record
///
/// One [`FieldConflict`] is produced per local payload key whose value differs
/// from the server's, in the local payload's key order. A create answered
/// with its own record yields nothing.
pub fn detect(local: &PendingChange, server: &Value, now_ms: i64) -> Vec<FieldConflict> {
    let Some(fields) = local.payload.as_object() else {
        return Vec::new();
    };

    let server_timestamp = server_timestamp(server).unwrap_or(now_ms);
    let change_id = local.id.to_string();

    fields
        .iter()
        .filter(|(field, _)| !IGNORED_FIELDS.contains(&field.as_str()))
        .filter_map(|(field, local_value)| {
            let server_value = server.get(field).unwrap_or(&Value::Null);
            if values_equal(local_value, server_value) {
                return None;
            }

            Some(FieldConflict {
                id: format!("{change_id}_{field}"),
                entity: local.entity.clone(),
                field: field.clone(),
                local_value: local_value.clone(),
                server_value: server_value.clone(),
                local_timestamp: local.timestamp,
                server_timestamp,
            })
        })
        .collect()
}

/// Build the conflict item for a change, or `None` when nothing really differs
pub fn conflict_item(local: &PendingChange, server: &Value, now_ms: i64) -> Option<ConflictItem> {
    let conflicts = detect(local, server, now_ms);
    if conflicts.is_empty() {
        return None;
    }

    Some(ConflictItem {
        id: local.id.to_string(),
        entity: local.entity.clone(),
        entity_id: local.entity_id.clone(),
        entity_name: local.display_name(),
        conflicts,
        local_timestamp: local.timestamp,
        server_timestamp: server_timestamp(server).unwrap_or(now_ms),
    })
}

/// Server last-write time in Unix ms, if the record carries one
///
/// Accepts integer milliseconds or RFC 3339 strings.
#[allow(clippy::cast_possible_truncation)] // fractional ms are dropped
pub fn server_timestamp(server: &Value) -> Option<i64> {
    SERVER_TIMESTAMP_FIELDS
        .iter()
        .filter_map(|field| server.get(*field))
        .find_map(|value| match value {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|ms| ms as i64)),
            Value::String(text) => chrono::DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|date_time| date_time.timestamp_millis())
                .or_else(|| text.parse::<i64>().ok()),
            _ => None,
        })
}

/// JSON-normalized equality
///
/// Object key order is irrelevant and numerically equal numbers match
/// regardless of integer/float representation.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(key, value)| b.get(key).is_some_and(|other| values_equal(value, other)))
        }
        _ => left == right,
    }
}
