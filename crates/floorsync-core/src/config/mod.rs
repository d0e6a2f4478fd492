//! Sync engine settings.
//!
//! Settings are plain JSON with every field defaulted, so a missing file or a
//! partial file both load. Unknown fields are rejected to catch typos.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_TTL_MS;
use crate::error::{Error, Result};
use crate::models::ResolutionStrategy;
use crate::resolve::DEFAULT_HISTORY_LIMIT;
use crate::util::{non_blank, server_url};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_PERIODIC_SYNC_SECS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Tunables for the queue, resolver, cache, and transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Attempts per change before it is marked failed
    pub max_retries: u32,
    /// Conflict history entries kept
    pub history_limit: usize,
    /// Default read cache lifetime in milliseconds
    pub cache_ttl_ms: i64,
    /// Resolve new conflicts from history instead of asking the resolver
    pub auto_resolve: bool,
    /// Strategy used when history has nothing for an entity
    pub default_strategy: ResolutionStrategy,
    /// Interval of the periodic drain; 0 disables it
    pub periodic_sync_secs: u64,
    pub api_base_url: Option<String>,
    /// Endpoint polled to derive connectivity
    pub health_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            history_limit: DEFAULT_HISTORY_LIMIT,
            cache_ttl_ms: DEFAULT_TTL_MS,
            auto_resolve: false,
            default_strategy: ResolutionStrategy::KeepServer,
            periodic_sync_secs: DEFAULT_PERIODIC_SYNC_SECS,
            api_base_url: None,
            health_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl SyncSettings {
    /// Load settings from a JSON file; a missing file yields defaults.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No settings at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(error) => return Err(error.into()),
        };

        let settings: Self = serde_json::from_str(&raw).map_err(|error| {
            Error::Config(format!("invalid settings in {}: {error}", path.display()))
        })?;
        settings.validate()?;
        Ok(settings.normalized())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".into()));
        }
        if self.history_limit == 0 {
            return Err(Error::Config("history_limit must be at least 1".into()));
        }
        if self.cache_ttl_ms <= 0 {
            return Err(Error::Config("cache_ttl_ms must be positive".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request_timeout_secs must be at least 1".into()));
        }

        for (field, value) in [
            ("api_base_url", &self.api_base_url),
            ("health_url", &self.health_url),
        ] {
            if let Some(url) = value.as_deref().and_then(non_blank) {
                if server_url(&url).is_none() {
                    return Err(Error::Config(format!(
                        "{field} must be an http:// or https:// URL with a host"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Settings with blank URLs dropped and trailing slashes trimmed.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let trim = |value: Option<String>| value.as_deref().and_then(server_url);
        self.api_base_url = trim(self.api_base_url);
        self.health_url = trim(self.health_url);
        self
    }

    /// Periodic drain interval, if enabled
    pub const fn periodic_interval(&self) -> Option<Duration> {
        if self.periodic_sync_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.periodic_sync_secs))
        }
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
