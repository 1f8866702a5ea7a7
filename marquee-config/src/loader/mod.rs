pub mod error;

use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};
use url::Url;

use crate::models::sources::{EnvConfig, FileConfig};
use crate::models::{
    BackendConfig, CacheConfig, Config, ConfigMetadata, DEFAULT_REQUEST_TIMEOUT,
    LogConfig, TableConfig,
};
use crate::util::parse_duration;
use error::ConfigLoadError;

/// Result of a successful load: the effective config plus any non-fatal
/// observations worth surfacing to the operator.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: Vec<String>,
}

/// Builds a [`Config`] from defaults, an optional TOML file and the
/// environment. Environment values win over file values.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_file: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    /// Apply the `.env` file, gather the environment and compose.
    ///
    /// An explicit env file must exist; the implicit `./.env` is optional.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.env_file {
            Some(path) => {
                dotenvy::from_path(path)?;
                Some(path.clone())
            }
            None => dotenvy::dotenv().ok(),
        };
        if let Some(path) = &env_file_loaded {
            debug!(path = %path.display(), "applied env file");
        }

        let file = match &self.config_path {
            Some(path) => read_file_config(path)?,
            None => FileConfig::default(),
        };

        let metadata = ConfigMetadata {
            config_path: self.config_path.clone(),
            env_file_loaded,
        };
        let load = compose(file, EnvConfig::gather(), metadata)?;
        info!(
            backend = %load.config.backend.url,
            favorites = %load.config.tables.favorites,
            profiles = %load.config.tables.profiles,
            "configuration loaded"
        );
        Ok(load)
    }
}

pub fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let raw =
        read_to_string(path).map_err(|source| ConfigLoadError::ConfigFileIo {
            path: path.to_path_buf(),
            source,
        })?;
    toml::from_str(&raw).map_err(|source| ConfigLoadError::ConfigFileParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Merge file and environment sources into a validated [`Config`].
///
/// Pure apart from reading an anon-key secret file, so tests can drive it
/// without touching the process environment.
pub fn compose(
    file: FileConfig,
    env: EnvConfig,
    metadata: ConfigMetadata,
) -> Result<ConfigLoad, ConfigLoadError> {
    let mut warnings = Vec::new();

    let raw_url = env
        .backend_url
        .or(file.backend.url)
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigLoadError::MissingBackendUrl)?;
    let url = parse_backend_url(&raw_url)?;
    if url.scheme() == "http" && !is_local_host(&url) {
        warnings.push(format!(
            "backend URL {url} uses plain http; session tokens will travel unencrypted"
        ));
    }

    let anon_key = resolve_anon_key(
        env.anon_key,
        env.anon_key_file,
        file.backend.anon_key,
        file.backend.anon_key_file,
    )?;

    let request_timeout = match env.request_timeout.or(file.backend.request_timeout) {
        Some(raw) => duration_setting("backend.request_timeout", &raw)?,
        None => DEFAULT_REQUEST_TIMEOUT,
    };

    let defaults = TableConfig::default();
    let tables = TableConfig {
        schema: table_setting("schema", env.schema, file.tables.schema, defaults.schema)?,
        favorites: table_setting(
            "favorites",
            env.favorites_table,
            file.tables.favorites,
            defaults.favorites,
        )?,
        profiles: table_setting(
            "profiles",
            env.profiles_table,
            file.tables.profiles,
            defaults.profiles,
        )?,
    };

    let stale_after = env
        .cache_stale_after
        .or(file.cache.stale_after)
        .map(|raw| duration_setting("cache.stale_after", &raw))
        .transpose()?;

    let log = LogConfig {
        filter: env
            .log_filter
            .or(file.log.filter)
            .unwrap_or_else(|| LogConfig::default().filter),
    };

    Ok(ConfigLoad {
        config: Config {
            backend: BackendConfig {
                url,
                anon_key,
                request_timeout,
            },
            tables,
            cache: CacheConfig { stale_after },
            log,
            metadata,
        },
        warnings,
    })
}

fn parse_backend_url(raw: &str) -> Result<Url, ConfigLoadError> {
    let url = Url::parse(raw.trim()).map_err(|source| {
        ConfigLoadError::InvalidBackendUrl {
            raw: raw.to_string(),
            source,
        }
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigLoadError::UnsupportedScheme {
            scheme: other.to_string(),
        }),
    }
}

fn is_local_host(url: &Url) -> bool {
    matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "::1" | "[::1]"))
}

fn resolve_anon_key(
    env_key: Option<String>,
    env_key_file: Option<PathBuf>,
    file_key: Option<String>,
    file_key_file: Option<PathBuf>,
) -> Result<String, ConfigLoadError> {
    if let Some(key) = env_key.filter(|k| !k.trim().is_empty()) {
        return Ok(key);
    }
    if let Some(path) = env_key_file.as_ref()
        && let Some(key) = read_secret_file(path)?
    {
        return Ok(key);
    }
    if let Some(key) = file_key.filter(|k| !k.trim().is_empty()) {
        return Ok(key);
    }
    if let Some(path) = file_key_file.as_ref()
        && let Some(key) = read_secret_file(path)?
    {
        return Ok(key);
    }
    Err(ConfigLoadError::MissingAnonKey)
}

fn read_secret_file(path: &Path) -> Result<Option<String>, ConfigLoadError> {
    let raw =
        read_to_string(path).map_err(|source| ConfigLoadError::SecretFileIo {
            path: path.to_path_buf(),
            source,
        })?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

fn duration_setting(
    key: &'static str,
    raw: &str,
) -> Result<Duration, ConfigLoadError> {
    parse_duration(raw).map_err(|source| ConfigLoadError::InvalidDuration {
        key,
        raw: raw.to_string(),
        source,
    })
}

fn table_setting(
    which: &'static str,
    env: Option<String>,
    file: Option<String>,
    default: String,
) -> Result<String, ConfigLoadError> {
    let value = env.or(file).unwrap_or(default);
    if value.trim().is_empty() {
        return Err(ConfigLoadError::EmptyTableName { which });
    }
    Ok(value.trim().to_string())
}
