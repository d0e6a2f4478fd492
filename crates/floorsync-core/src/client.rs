//! Network boundary between the sync engine and the server
//!
//! The engine only sees [`EntityApi`]. Failures of a single submission are
//! reported as data in [`ApplyOutcome`] so one bad item never aborts a drain.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{ChangeType, PendingChange};
use crate::util::{error_excerpt, server_url};

/// Why a submission did not land
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    /// Worth retrying later (timeouts, 5xx, throttling)
    #[error("{0}")]
    Transient(String),

    /// The server refused the change; retrying cannot help
    #[error("rejected: {0}")]
    Rejected(String),

    /// Connectivity dropped during the call
    #[error("offline: {0}")]
    Offline(String),
}

/// Result of submitting one queued change
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Accepted; carries the server's record (may be `null`)
    Applied(Value),
    /// Refused because the server holds a different version; carries that version
    Conflict(Value),
    Failed(ApplyError),
}

/// Submits queued changes to the server
pub trait EntityApi: Send + Sync {
    fn apply<'a>(&'a self, change: &'a PendingChange) -> BoxFuture<'a, ApplyOutcome>;
}

type Handler = Arc<dyn Fn(String, Value) -> BoxFuture<'static, ApplyOutcome> + Send + Sync>;

/// [`EntityApi`] dispatching to injected per-`(entity, type)` handlers
///
/// Changes with no registered handler are rejected.
#[derive(Default, Clone)]
pub struct EntityRouter {
    handlers: HashMap<(String, ChangeType), Handler>,
}

impl EntityRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for one entity and change type
    ///
    /// The handler receives the entity id and the payload.
    #[must_use]
    pub fn route<F, Fut>(mut self, entity: impl Into<String>, change_type: ChangeType, handler: F) -> Self
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ApplyOutcome> + Send + 'static,
    {
        self.handlers.insert(
            (entity.into(), change_type),
            Arc::new(move |entity_id, payload| handler(entity_id, payload).boxed()),
        );
        self
    }
}

impl EntityApi for EntityRouter {
    fn apply<'a>(&'a self, change: &'a PendingChange) -> BoxFuture<'a, ApplyOutcome> {
        let key = (change.entity.clone(), change.change_type);
        match self.handlers.get(&key) {
            Some(handler) => handler(change.entity_id.clone(), change.payload.clone()),
            None => {
                let reason = format!("no handler for {} {}", change.change_type, change.entity);
                async move { ApplyOutcome::Failed(ApplyError::Rejected(reason)) }.boxed()
            }
        }
    }
}

/// tRPC procedure for an entity and change type
pub fn procedure(entity: &str, change_type: ChangeType) -> String {
    let known = match (entity, change_type) {
        ("spc_measurement", ChangeType::Create) => Some("spc.createMeasurement"),
        ("spc_measurement", ChangeType::Update) => Some("spc.updateMeasurement"),
        ("spc_measurement", ChangeType::Delete) => Some("spc.deleteMeasurement"),
        ("oee_data", ChangeType::Create) => Some("oee.createRecord"),
        ("oee_data", ChangeType::Update) => Some("oee.updateRecord"),
        ("oee_data", ChangeType::Delete) => Some("oee.deleteRecord"),
        ("machine_status", ChangeType::Create) => Some("machine.createStatus"),
        ("machine_status", ChangeType::Update) => Some("machine.updateStatus"),
        ("machine_status", ChangeType::Delete) => Some("machine.deleteStatus"),
        _ => None,
    };

    known.map_or_else(|| format!("{entity}.{change_type}"), ToString::to_string)
}

/// HTTP transport to the plant server's tRPC endpoints
#[derive(Clone)]
pub struct HttpEntityClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEntityClient {
    /// Create a client for `base_url` (scheme required)
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let Some(base_url) = server_url(base_url) else {
            return Err(Error::Config(format!(
                "API base URL must include http:// or https:// and a host: {}",
                base_url.trim()
            )));
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            client,
            base_url,
        })
    }

    /// Full URL for an entity and change type
    pub fn endpoint(&self, entity: &str, change_type: ChangeType) -> String {
        format!("{}/api/trpc/{}", self.base_url, procedure(entity, change_type))
    }

    async fn submit(&self, change: &PendingChange) -> ApplyOutcome {
        let url = self.endpoint(&change.entity, change.change_type);
        let request = match change.change_type {
            ChangeType::Create => self.client.post(&url).json(&change.payload),
            ChangeType::Update => self.client.put(&url).json(&change.payload),
            ChangeType::Delete => self
                .client
                .delete(&url)
                .query(&[("id", change.entity_id.as_str())]),
        }
        .header("Idempotency-Key", change.id.to_string());

        tracing::debug!("{} {url}", change.change_type);

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => return ApplyOutcome::Failed(transport_error(&error)),
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => classify_response(status, &body),
            Err(error) => ApplyOutcome::Failed(transport_error(&error)),
        }
    }
}

impl EntityApi for HttpEntityClient {
    fn apply<'a>(&'a self, change: &'a PendingChange) -> BoxFuture<'a, ApplyOutcome> {
        self.submit(change).boxed()
    }
}

fn transport_error(error: &reqwest::Error) -> ApplyError {
    if error.is_connect() {
        ApplyError::Offline(error.to_string())
    } else {
        ApplyError::Transient(error.to_string())
    }
}

/// Map an HTTP status and body to an outcome
pub fn classify_response(status: u16, body: &str) -> ApplyOutcome {
    let json = serde_json::from_str::<Value>(body).ok();
    let record = json.as_ref().map(unwrap_envelope);

    if status == 409 {
        let server = record
            .map(|record| server_data(record).unwrap_or(record).clone())
            .unwrap_or(Value::Null);
        return ApplyOutcome::Conflict(server);
    }

    if (200..300).contains(&status) {
        return match record {
            Some(record) if record.get("conflict") == Some(&Value::Bool(true)) => {
                ApplyOutcome::Conflict(server_data(record).cloned().unwrap_or(Value::Null))
            }
            Some(record) => ApplyOutcome::Applied(record.clone()),
            None => ApplyOutcome::Applied(Value::Null),
        };
    }

    let reason = format!("HTTP {status}: {}", error_excerpt(body));
    if status == 408 || status == 429 || status >= 500 {
        ApplyOutcome::Failed(ApplyError::Transient(reason))
    } else {
        ApplyOutcome::Failed(ApplyError::Rejected(reason))
    }
}

/// Strip the `{result: {data: ...}}` wrapper tRPC puts around responses
fn unwrap_envelope(json: &Value) -> &Value {
    let Some(data) = json.pointer("/result/data") else {
        return json;
    };
    data.get("json").unwrap_or(data)
}

fn server_data(record: &Value) -> Option<&Value> {
    record
        .get("serverData")
        .or_else(|| record.pointer("/error/data/serverData"))
}
