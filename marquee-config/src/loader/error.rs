use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("backend URL is not configured (set MARQUEE_BACKEND_URL or backend.url)")]
    MissingBackendUrl,
    #[error("invalid backend URL '{raw}'")]
    InvalidBackendUrl {
        raw: String,
        #[source]
        source: url::ParseError,
    },
    #[error("backend URL must use http or https, got '{scheme}'")]
    UnsupportedScheme { scheme: String },
    #[error("anon key is not configured (set MARQUEE_ANON_KEY or backend.anon_key)")]
    MissingAnonKey,
    #[error("table name for {which} must not be empty")]
    EmptyTableName { which: &'static str },
    #[error("invalid duration '{raw}' for {key}")]
    InvalidDuration {
        key: &'static str,
        raw: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error("failed to read config file {path}")]
    ConfigFileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}")]
    ConfigFileParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to read secret file {path}")]
    SecretFileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}
