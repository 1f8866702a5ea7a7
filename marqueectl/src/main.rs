//! `marqueectl`: favorites and session access from the command line.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use marquee_config::ConfigLoader;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &cli.env_file {
        loader = loader.with_env_file(path);
    }
    let load = loader.load().context("could not load configuration")?;

    // RUST_LOG wins over the configured filter.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| load.config.log.filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    for warning in &load.warnings {
        warn!("{warning}");
    }

    cli::commands::run(cli.command, &load.config).await
}
