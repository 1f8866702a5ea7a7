#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use marquee_client::infrastructure::{Backend, MemoryBackend};
use marquee_client::{AuthContext, AuthProvider, ProviderSettings, SyncState};
use marquee_model::{AuthUser, Record, Session, UserId, UserProfile};
use serde_json::Value;

pub const PROFILES: &str = "user_profiles";
pub const FAVORITES: &str = "favorites";

const WAIT: Duration = Duration::from_secs(5);

pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("test record must be an object, got {other}"),
    }
}

pub fn user(id: &str) -> UserId {
    UserId::new(id).expect("test user id")
}

pub fn session_for(id: &str) -> Session {
    Session::for_user(
        format!("token-{id}"),
        AuthUser {
            id: user(id),
            email: Some(format!("{id}@example.com")),
        },
    )
}

pub fn profile(id: &str, name: &str) -> UserProfile {
    UserProfile::new(user(id)).with_field("name", name)
}

pub fn mount(backend: &Arc<MemoryBackend>) -> AuthProvider {
    AuthProvider::mount(
        Backend::from_shared(backend.clone()),
        ProviderSettings::default(),
    )
}

/// Wait (bounded) until the context's state satisfies `predicate`.
pub async fn settle<F>(context: &mut AuthContext, predicate: F) -> SyncState
where
    F: FnMut(&SyncState) -> bool,
{
    tokio::time::timeout(WAIT, context.wait_for(predicate))
        .await
        .expect("state did not settle in time")
        .expect("provider went away")
}

/// Poll `condition` until it holds or the wait times out.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
