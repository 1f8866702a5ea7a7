//! Shared configuration library for Marquee.
//!
//! Configuration is layered: compiled defaults, then an optional TOML file,
//! then the process environment (after an optional `.env` file has been
//! applied). The merged result is validated once and handed to the client
//! library and the CLI as a plain [`Config`].

pub mod loader;
pub mod models;
pub mod util;

pub use loader::{ConfigLoad, ConfigLoader, error::ConfigLoadError};
pub use models::sources::{EnvConfig, FileConfig};
pub use models::{
    BackendConfig, CacheConfig, Config, ConfigMetadata, LogConfig, TableConfig,
};
