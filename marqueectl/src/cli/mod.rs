//! Command-line surface.

pub mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "marqueectl", version, about = "Marquee favorites and session tool")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "MARQUEE_CONFIG")]
    pub config: Option<PathBuf>,

    /// .env file applied before the environment is read
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List, add or remove favorite movies
    Favorites {
        #[command(subcommand)]
        action: FavoritesAction,
    },
    /// Sign in and inspect the session
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct Credentials {
    /// Sign in with this email first
    #[arg(long, env = "MARQUEE_EMAIL")]
    pub email: Option<String>,

    /// Password for --email
    #[arg(long, env = "MARQUEE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

/// Whose favorites to act on.
#[derive(Args, Debug, Clone)]
pub struct Target {
    #[command(flatten)]
    pub credentials: Credentials,

    /// User id to act on (defaults to the signed-in user)
    #[arg(long)]
    pub user: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum FavoritesAction {
    /// Print the favorites list as JSON
    List {
        #[command(flatten)]
        target: Target,
    },
    /// Add a movie to the favorites
    Add {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        movie_id: u64,

        #[arg(long)]
        title: Option<String>,

        /// Extra column as key=value (value parsed as JSON when possible)
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, serde_json::Value)>,
    },
    /// Remove a movie from the favorites
    Remove {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        movie_id: u64,
    },
}

#[derive(Subcommand, Debug)]
pub enum AuthAction {
    /// Sign in with email and password and print the session user
    SignIn {
        #[arg(long, env = "MARQUEE_EMAIL")]
        email: String,

        #[arg(long, env = "MARQUEE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Print the synchronized session and profile as JSON
    Session {
        #[command(flatten)]
        credentials: Credentials,

        /// Give up waiting for the profile after this many seconds
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
}

fn parse_field(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
