//! Effective (validated) configuration types.

pub mod sources;

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

/// Default request timeout for calls against the hosted backend.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_FAVORITES_TABLE: &str = "favorites";
pub const DEFAULT_PROFILES_TABLE: &str = "user_profiles";
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    pub tables: TableConfig,
    pub cache: CacheConfig,
    pub log: LogConfig,
    pub metadata: ConfigMetadata,
}

/// Where the hosted backend lives and how to talk to it.
#[derive(Clone)]
pub struct BackendConfig {
    pub url: Url,
    pub anon_key: String,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("url", &self.url.as_str())
            .field("anon_key", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    pub schema: String,
    pub favorites: String,
    pub profiles: String,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
            favorites: DEFAULT_FAVORITES_TABLE.to_string(),
            profiles: DEFAULT_PROFILES_TABLE.to_string(),
        }
    }
}

/// Query cache tuning. `stale_after: None` keeps entries until a mutation
/// invalidates them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheConfig {
    pub stale_after: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

/// Provenance of the loaded configuration, for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: Option<PathBuf>,
}
