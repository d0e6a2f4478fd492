use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use floorsync_core::models::ConflictHistoryEntry;
use floorsync_core::util::non_blank;
use floorsync_core::{
    ChangeId, ConflictItem, ConnectivityHandle, EntityApi, EntityRouter, HttpEntityClient,
    PendingChange, SqliteStore, SyncEngine, SyncMetadata, SyncSettings,
};
use serde_json::Value;

use crate::cli::Cli;
use crate::error::CliError;

/// Resolved global options shared by every command
#[derive(Debug, Clone)]
pub struct Context {
    pub store_path: PathBuf,
    pub settings: SyncSettings,
    pub offline: bool,
}

impl Context {
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let settings_path = cli.config.clone().unwrap_or_else(default_settings_path);
        let mut settings = SyncSettings::load_from_path(&settings_path)?;

        let api_url = cli
            .api_url
            .clone()
            .or_else(|| env::var("FLOORSYNC_API_URL").ok());
        if let Some(url) = api_url.and_then(non_blank) {
            settings.api_base_url = Some(url);
            settings.validate()?;
            settings = settings.normalized();
        }

        Ok(Self {
            store_path: resolve_store_path(cli.store.clone()),
            settings,
            offline: cli.offline,
        })
    }
}

/// Open the engine over the on-disk store
///
/// Commands that drain the queue need a server; the rest run against a
/// router with no routes so nothing can leave the machine.
pub fn open_engine(context: &Context, require_api: bool) -> Result<SyncEngine, CliError> {
    open_engine_with(
        context,
        require_api,
        ConnectivityHandle::new(!context.offline),
    )
}

/// Open the engine driven by an externally owned connectivity handle
pub fn open_engine_with(
    context: &Context,
    require_api: bool,
    connectivity: ConnectivityHandle,
) -> Result<SyncEngine, CliError> {
    let api: Arc<dyn EntityApi> = match context.settings.api_base_url.as_deref() {
        Some(url) => Arc::new(HttpEntityClient::new(
            url,
            context.settings.request_timeout(),
        )?),
        None if require_api => return Err(CliError::ApiNotConfigured),
        None => Arc::new(EntityRouter::new()),
    };

    let store = Arc::new(SqliteStore::open(&context.store_path)?);

    Ok(SyncEngine::new(
        store,
        api,
        Arc::new(connectivity),
        context.settings.clone(),
    )?)
}

pub fn resolve_store_path(cli_store_path: Option<PathBuf>) -> PathBuf {
    cli_store_path
        .or_else(|| env::var_os("FLOORSYNC_STORE_PATH").map(PathBuf::from))
        .unwrap_or_else(default_store_path)
}

pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("floorsync")
        .join("floorsync.db")
}

pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("floorsync")
        .join("settings.json")
}

/// Parse a JSON payload argument, falling back to piped stdin
pub fn resolve_payload(data: Option<&str>) -> Result<Value, CliError> {
    let raw = match data {
        Some(data) => Some(data.to_string()),
        None => read_piped_stdin()?,
    };
    parse_payload(raw.as_deref())
}

pub fn parse_payload(raw: Option<&str>) -> Result<Value, CliError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(Value::Null);
    };

    let payload: Value =
        serde_json::from_str(raw).map_err(|error| CliError::InvalidPayload(error.to_string()))?;
    if payload.is_object() || payload.is_null() {
        Ok(payload)
    } else {
        Err(CliError::InvalidPayload(
            "payload must be a JSON object".to_string(),
        ))
    }
}

fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(non_blank(buffer))
}

pub fn normalize_change_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyChangeId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Match a full change id or a unique prefix of one
pub fn resolve_change_id(query: &str, changes: &[PendingChange]) -> Result<ChangeId, CliError> {
    let query = normalize_change_identifier(query)?;

    if let Ok(id) = query.parse::<ChangeId>() {
        if changes.iter().any(|change| change.id == id) {
            return Ok(id);
        }
    }

    let matching = changes
        .iter()
        .filter(|change| change.id.to_string().starts_with(&query))
        .map(|change| change.id)
        .collect::<Vec<_>>();

    match matching.as_slice() {
        [] => Err(CliError::ChangeNotFound(query)),
        [id] => Ok(*id),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|id| short_id(&id.to_string()))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousChangeId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn format_change_lines(changes: &[PendingChange]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    changes
        .iter()
        .map(|change| {
            let id = short_id(&change.id.to_string());
            let target = format!("{} #{}", change.entity, change.entity_id);
            let relative_time = format_relative_time(change.timestamp, now_ms);
            let line = format!(
                "{id:<13}  {:<7}  {:<8}  {target:<32}  {relative_time}",
                change.change_type.as_str(),
                change.status.as_str(),
            );

            match &change.last_error {
                Some(error) => format!(
                    "{line}  retries={}/{} error={error}",
                    change.retry_count, change.max_retries
                ),
                None => line,
            }
        })
        .collect()
}

pub fn format_status_lines(metadata: &SyncMetadata) -> Vec<String> {
    let mut lines = vec![
        format!(
            "connection: {}",
            if metadata.is_online { "online" } else { "offline" }
        ),
        format!("pending:    {}", metadata.pending_count),
        format!("failed:     {}", metadata.failed_count),
        format!("conflicts:  {}", metadata.conflict_count),
        format!(
            "last sync:  {}",
            metadata
                .last_sync_at
                .map_or_else(|| "never".to_string(), format_timestamp)
        ),
    ];
    if let Some(error) = &metadata.last_error {
        lines.push(format!("last error: {error}"));
    }
    lines
}

pub fn format_conflict_lines(items: &[ConflictItem]) -> Vec<String> {
    let mut lines = Vec::new();
    for item in items {
        lines.push(format!(
            "{}  {}  ({} field(s))",
            short_id(&item.id),
            item.entity_name,
            item.conflicts.len()
        ));
        for conflict in &item.conflicts {
            lines.push(format!(
                "    {}: local={} server={}",
                conflict.field,
                render_value(&conflict.local_value),
                render_value(&conflict.server_value)
            ));
        }
    }
    lines
}

pub fn format_history_lines(entries: &[ConflictHistoryEntry]) -> Vec<String> {
    entries
        .iter()
        .flat_map(|entry| {
            entry.resolutions.iter().map(move |resolved| {
                format!(
                    "{}  {:<11}  {:<16}  change={}",
                    format_timestamp(entry.timestamp),
                    resolved.strategy.as_str(),
                    resolved.entity,
                    short_id(&resolved.id)
                )
            })
        })
        .collect()
}

fn render_value(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}
