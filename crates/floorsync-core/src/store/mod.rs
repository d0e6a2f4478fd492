//! Durable key-value storage for the queue, conflict history, and read cache

mod migrations;
mod sqlite;

use std::collections::HashMap;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

pub use sqlite::SqliteStore;

/// Storage key for the pending change queue
pub const QUEUE_KEY: &str = "floorsync.queue";
/// Storage key for the last published sync metadata
pub const STATUS_KEY: &str = "floorsync.status";
/// Storage key for the conflict resolution history
pub const HISTORY_KEY: &str = "floorsync.conflict_history";
/// Prefix for read cache entries
pub const CACHE_PREFIX: &str = "floorsync.cache.";
/// Storage key for the list of cached keys
pub const CACHE_INDEX_KEY: &str = "floorsync.cache_index";

/// String-keyed durable storage
///
/// Implementations are expected to be synchronous enough that callers do not
/// retry; any error is fatal to the operation that triggered it.
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or replace a value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value; missing keys are not an error
    fn remove(&self, key: &str) -> Result<()>;
}

/// Read and deserialize a JSON value
pub fn load_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    store
        .get(key)?
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(Error::from)
}

/// Serialize and write a JSON value
pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

/// In-process store; contents do not survive a restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Persistence("memory store lock poisoned".into()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }
}
