//! Command handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use marquee_client::infrastructure::{Backend, QueryCache, RestBackend};
use marquee_client::{AuthProvider, FavoritesService, ProviderSettings};
use marquee_config::Config;
use marquee_model::{Movie, MovieId, Session, UserId};
use serde_json::json;
use tracing::{debug, info};

use super::{AuthAction, Command, Credentials, FavoritesAction, Target};

pub async fn run(command: Command, config: &Config) -> Result<()> {
    let rest = Arc::new(RestBackend::from_config(config).context("could not create backend client")?);

    match command {
        Command::Favorites { action } => favorites(action, rest, config).await,
        Command::Auth { action } => auth(action, rest, config).await,
    }
}

async fn favorites(action: FavoritesAction, rest: Arc<RestBackend>, config: &Config) -> Result<()> {
    let backend = Backend::from_shared(rest.clone());
    let cache = Arc::new(QueryCache::from_config(&config.cache));
    let service = FavoritesService::from_backend(&backend, cache, &config.tables);

    match action {
        FavoritesAction::List { target } => {
            let user_id = resolve_user(&rest, &target).await?;
            let listed = service.list_favorites(&user_id).await?;
            println!("{}", serde_json::to_string_pretty(listed.as_ref())?);
        }
        FavoritesAction::Add {
            target,
            movie_id,
            title,
            fields,
        } => {
            let user_id = resolve_user(&rest, &target).await?;
            let mut movie = Movie::new(MovieId(movie_id));
            if let Some(title) = title {
                movie = movie.with_field("title", title);
            }
            for (key, value) in fields {
                movie = movie.with_field(key, value);
            }
            service.add_favorite(&user_id, movie).await?;
            println!("added movie {movie_id} for {user_id}");
        }
        FavoritesAction::Remove { target, movie_id } => {
            let user_id = resolve_user(&rest, &target).await?;
            let removed = service.remove_favorite(&user_id, MovieId(movie_id)).await?;
            if removed == 0 {
                println!("movie {movie_id} was not a favorite of {user_id}");
            } else {
                println!("removed movie {movie_id} for {user_id}");
            }
        }
    }
    Ok(())
}

async fn auth(action: AuthAction, rest: Arc<RestBackend>, config: &Config) -> Result<()> {
    match action {
        AuthAction::SignIn { email, password } => {
            let session = rest
                .sign_in_with_password(&email, &password)
                .await
                .context("sign-in failed")?;
            let user = session
                .user_id()
                .map(UserId::to_string)
                .unwrap_or_else(|| "<no user>".to_string());
            println!("signed in as {user}");
            if let Some(expires_at) = session.expires_at {
                println!("session expires at {expires_at}");
            }
        }
        AuthAction::Session {
            credentials,
            timeout_secs,
        } => {
            sign_in(&rest, &credentials).await?;

            let provider = AuthProvider::mount(
                Backend::from_shared(rest.clone()),
                ProviderSettings::from_tables(&config.tables),
            );
            let mut context = provider.context();
            let settled = tokio::time::timeout(
                Duration::from_secs(timeout_secs),
                context.settled(),
            )
            .await
            .context("timed out waiting for the session to settle")?
            .ok_or_else(|| anyhow!("synchronizer stopped before settling"))?;
            provider.unmount().await;

            let snapshot = json!({
                "session": settled.session,
                "profile": settled.profile,
                "is_loading": settled.is_loading,
                "error": settled.error.as_ref().map(ToString::to_string),
            });
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }
    Ok(())
}

async fn sign_in(rest: &RestBackend, credentials: &Credentials) -> Result<Option<Session>> {
    match (&credentials.email, &credentials.password) {
        (Some(email), Some(password)) => {
            let session = rest
                .sign_in_with_password(email, password)
                .await
                .context("sign-in failed")?;
            info!(email = %email, "signed in");
            Ok(Some(session))
        }
        (Some(_), None) => bail!("--password is required with --email"),
        (None, Some(_)) => bail!("--email is required with --password"),
        (None, None) => Ok(None),
    }
}

async fn resolve_user(rest: &RestBackend, target: &Target) -> Result<UserId> {
    let session = sign_in(rest, &target.credentials).await?;
    if let Some(raw) = &target.user {
        return UserId::new(raw.clone()).context("invalid --user");
    }
    let user_id = session
        .as_ref()
        .and_then(Session::user_id)
        .cloned()
        .ok_or_else(|| anyhow!("pass --user or sign in with --email/--password"))?;
    debug!(user = %user_id, "acting as signed-in user");
    Ok(user_id)
}
