use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::util::env_nonempty;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub backend: FileBackendConfig,
    #[serde(default)]
    pub tables: FileTableConfig,
    #[serde(default)]
    pub cache: FileCacheConfig,
    #[serde(default)]
    pub log: FileLogConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileBackendConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anon_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anon_key_file: Option<PathBuf>,
    /// Humantime string such as `"10s"` or `"1m 30s"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileTableConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favorites: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profiles: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCacheConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_after: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLogConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Environment-derived configuration values.
///
/// The `SUPABASE_*` names are accepted as fallbacks so an existing web
/// project's `.env` works unchanged.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub backend_url: Option<String>,
    pub anon_key: Option<String>,
    pub anon_key_file: Option<PathBuf>,
    pub request_timeout: Option<String>,
    pub schema: Option<String>,
    pub favorites_table: Option<String>,
    pub profiles_table: Option<String>,
    pub cache_stale_after: Option<String>,
    pub log_filter: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            backend_url: env_nonempty("MARQUEE_BACKEND_URL")
                .or_else(|| env_nonempty("SUPABASE_URL")),
            anon_key: env_nonempty("MARQUEE_ANON_KEY")
                .or_else(|| env_nonempty("SUPABASE_ANON_KEY")),
            anon_key_file: env_nonempty("MARQUEE_ANON_KEY_FILE")
                .map(PathBuf::from),
            request_timeout: env_nonempty("MARQUEE_REQUEST_TIMEOUT"),
            schema: env_nonempty("MARQUEE_SCHEMA"),
            favorites_table: env_nonempty("MARQUEE_FAVORITES_TABLE"),
            profiles_table: env_nonempty("MARQUEE_PROFILES_TABLE"),
            cache_stale_after: env_nonempty("MARQUEE_CACHE_STALE_AFTER"),
            log_filter: env_nonempty("MARQUEE_LOG"),
        }
    }
}
