use std::sync::Arc;

use floorsync_core::cache::ReadCache;
use floorsync_core::SqliteStore;
use serde_json::Value;

use crate::commands::common::Context;
use crate::error::CliError;

fn open_cache(context: &Context) -> Result<ReadCache, CliError> {
    let store = Arc::new(SqliteStore::open(&context.store_path)?);
    Ok(ReadCache::new(store, context.settings.cache_ttl_ms)?)
}

pub fn run_cache_get(context: &Context, key: &str) -> Result<(), CliError> {
    let cache = open_cache(context)?;
    match cache.get_cached_data::<Value>(key)? {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => println!("No cached value for '{key}'"),
    }
    Ok(())
}

pub fn run_cache_set(
    context: &Context,
    key: &str,
    raw_value: &str,
    ttl_ms: Option<i64>,
) -> Result<(), CliError> {
    let value: Value = serde_json::from_str(raw_value)
        .map_err(|error| CliError::InvalidPayload(error.to_string()))?;
    let cache = open_cache(context)?;
    cache.cache_data(key, &value, ttl_ms)?;
    println!("Cached '{key}'");
    Ok(())
}

pub fn run_cache_purge(context: &Context, all: bool) -> Result<(), CliError> {
    let cache = open_cache(context)?;
    let removed = if all {
        cache.clear()?
    } else {
        cache.clear_expired()?
    };
    println!("Removed {removed} cached entr{}", if removed == 1 { "y" } else { "ies" });
    Ok(())
}
