mod common;

use std::sync::Arc;

use common::{PROFILES, eventually, mount, profile, record, session_for, settle, user};
use marquee_client::infrastructure::{Filter, MemoryBackend, Op, RowStore};
use marquee_client::{ContextError, Scope, SyncError, use_auth};
use serde_json::json;

fn backend_with_profiles() -> Arc<MemoryBackend> {
    let backend = MemoryBackend::shared();
    backend.seed(
        PROFILES,
        [
            record(json!({ "user_id": "u1", "name": "A" })),
            record(json!({ "user_id": "u2", "name": "X" })),
        ],
    );
    backend
}

#[tokio::test]
async fn no_session_settles_to_empty_state() {
    let backend = backend_with_profiles();
    let provider = mount(&backend);
    let mut auth = provider.context();

    let state = settle(&mut auth, |s| !s.is_loading).await;

    assert!(state.session.is_none());
    assert!(state.profile.is_none());
    assert!(state.error.is_none());
    assert!(backend.open_channels().is_empty());
    assert_eq!(backend.calls(Op::Select, PROFILES), 0);
    provider.unmount().await;
}

#[tokio::test]
async fn session_with_profile_settles_with_one_channel() {
    let backend = backend_with_profiles();
    backend.set_session(Some(session_for("u1")));
    let provider = mount(&backend);
    let mut auth = provider.context();

    let state = settle(&mut auth, |s| !s.is_loading).await;

    assert_eq!(state.session, Some(session_for("u1")));
    assert_eq!(state.profile, Some(profile("u1", "A")));
    assert!(state.error.is_none());
    assert_eq!(
        backend.open_channels(),
        vec!["public:user_profiles?user_id=eq.u1".to_string()]
    );
    provider.unmount().await;
}

#[tokio::test]
async fn live_change_replaces_profile_only() {
    let backend = backend_with_profiles();
    backend.set_session(Some(session_for("u1")));
    let provider = mount(&backend);
    let mut auth = provider.context();
    settle(&mut auth, |s| !s.is_loading).await;

    backend.update_eq(
        PROFILES,
        &[Filter::eq("user_id", "u1")],
        record(json!({ "name": "B" })),
    );

    let state = settle(&mut auth, |s| s.profile == Some(profile("u1", "B"))).await;
    assert!(!state.is_loading);
    assert!(state.error.is_none());
    assert_eq!(state.session, Some(session_for("u1")));
    provider.unmount().await;
}

#[tokio::test]
async fn deleted_profile_row_clears_profile() {
    let backend = backend_with_profiles();
    backend.set_session(Some(session_for("u1")));
    let provider = mount(&backend);
    let mut auth = provider.context();
    settle(&mut auth, |s| s.profile.is_some()).await;

    backend
        .delete_eq(PROFILES, &[Filter::eq("user_id", "u1")])
        .await
        .unwrap();

    let state = settle(&mut auth, |s| s.profile.is_none()).await;
    assert!(!state.is_loading);
    assert_eq!(state.session, Some(session_for("u1")));
    provider.unmount().await;
}

#[tokio::test]
async fn late_profile_for_previous_user_is_discarded() {
    let backend = backend_with_profiles();
    backend.set_session(Some(session_for("u1")));
    let gate = backend.hold(PROFILES, Filter::eq("user_id", "u1"));
    let provider = mount(&backend);
    let mut auth = provider.context();

    // u1's profile read is parked behind the gate.
    settle(&mut auth, |s| s.session.is_some()).await;
    backend.sign_in(session_for("u2"));

    let state = settle(&mut auth, |s| {
        s.user_id() == Some(&user("u2")) && !s.is_loading
    })
    .await;
    assert_eq!(state.profile, Some(profile("u2", "X")));

    gate.release();
    eventually(|| provider.stale_results() == 1).await;

    let state = provider.state();
    assert_eq!(state.profile, Some(profile("u2", "X")));
    assert_eq!(state.session, Some(session_for("u2")));
    assert_eq!(
        backend.open_channels(),
        vec!["public:user_profiles?user_id=eq.u2".to_string()]
    );
    provider.unmount().await;
}

#[tokio::test]
async fn auth_event_supersedes_a_pending_initial_session_fetch() {
    let backend = backend_with_profiles();
    backend.set_session(Some(session_for("u1")));
    let gate = backend.hold_session();
    let provider = mount(&backend);
    let mut auth = provider.context();

    // The initial read has captured u1 and is parked behind the gate.
    eventually(|| backend.auth_listeners() == 1).await;
    backend.sign_in(session_for("u2"));

    let state = settle(&mut auth, |s| {
        s.user_id() == Some(&user("u2")) && !s.is_loading
    })
    .await;
    assert_eq!(state.profile, Some(profile("u2", "X")));

    gate.release();
    eventually(|| provider.stale_results() == 1).await;

    let state = provider.state();
    assert_eq!(state.session, Some(session_for("u2")));
    assert_eq!(state.profile, Some(profile("u2", "X")));
    assert!(state.error.is_none());
    assert_eq!(
        backend.open_channels(),
        vec!["public:user_profiles?user_id=eq.u2".to_string()]
    );
    assert_eq!(backend.calls(Op::Select, PROFILES), 1);
    provider.unmount().await;
}

#[tokio::test]
async fn switching_users_replaces_the_channel() {
    let backend = backend_with_profiles();
    backend.set_session(Some(session_for("u1")));
    let provider = mount(&backend);
    let mut auth = provider.context();
    settle(&mut auth, |s| s.profile == Some(profile("u1", "A"))).await;

    backend.sign_in(session_for("u2"));
    settle(&mut auth, |s| s.profile == Some(profile("u2", "X"))).await;

    assert_eq!(
        backend.open_channels(),
        vec!["public:user_profiles?user_id=eq.u2".to_string()]
    );
    assert_eq!(backend.channels_closed(), 1);
    provider.unmount().await;
}

#[tokio::test]
async fn unmount_closes_the_channel_exactly_once() {
    let backend = backend_with_profiles();
    backend.set_session(Some(session_for("u1")));
    let provider = mount(&backend);
    let mut auth = provider.context();
    settle(&mut auth, |s| !s.is_loading).await;
    assert_eq!(backend.open_channels().len(), 1);
    assert_eq!(backend.auth_listeners(), 1);

    provider.unmount().await;

    assert!(backend.open_channels().is_empty());
    assert_eq!(backend.channels_closed(), 1);
    assert_eq!(backend.auth_listeners(), 0);
}

#[tokio::test]
async fn dropping_the_provider_also_tears_down() {
    let backend = backend_with_profiles();
    backend.set_session(Some(session_for("u1")));
    let provider = mount(&backend);
    let mut auth = provider.context();
    settle(&mut auth, |s| !s.is_loading).await;

    drop(provider);

    eventually(|| backend.open_channels().is_empty() && backend.auth_listeners() == 0).await;
    assert_eq!(backend.channels_closed(), 1);
    assert!(!auth.changed().await);
}

#[tokio::test]
async fn sign_out_clears_state_and_closes_channel() {
    let backend = backend_with_profiles();
    backend.set_session(Some(session_for("u1")));
    let provider = mount(&backend);
    let mut auth = provider.context();
    settle(&mut auth, |s| s.profile.is_some()).await;

    backend.sign_out();

    let state = settle(&mut auth, |s| s.session.is_none()).await;
    assert!(state.profile.is_none());
    assert!(!state.is_loading);
    assert!(backend.open_channels().is_empty());
    assert_eq!(backend.channels_closed(), 1);
    provider.unmount().await;
    assert_eq!(backend.channels_closed(), 1);
}

#[tokio::test]
async fn session_fetch_error_is_recorded_and_loading_ends() {
    let backend = backend_with_profiles();
    backend.set_session_error(Some("auth gateway unavailable"));
    let provider = mount(&backend);
    let mut auth = provider.context();

    let state = settle(&mut auth, |s| !s.is_loading).await;

    assert!(state.session.is_none());
    assert!(state.profile.is_none());
    match state.error {
        Some(SyncError::SessionFetch(cause)) => assert!(cause.contains("auth gateway unavailable")),
        other => panic!("unexpected error: {other:?}"),
    }
    provider.unmount().await;
}

#[tokio::test]
async fn profile_fetch_error_is_recorded_without_subscribing() {
    let backend = backend_with_profiles();
    backend.set_session(Some(session_for("u1")));
    backend.fail(Op::Select, PROFILES);
    let provider = mount(&backend);
    let mut auth = provider.context();

    let state = settle(&mut auth, |s| !s.is_loading).await;

    assert_eq!(state.session, Some(session_for("u1")));
    assert!(state.profile.is_none());
    assert!(matches!(state.error, Some(SyncError::ProfileFetch(_))));
    assert!(backend.open_channels().is_empty());
    assert_eq!(backend.calls(Op::Subscribe, PROFILES), 0);
    provider.unmount().await;
}

#[tokio::test]
async fn auth_change_clears_previous_error() {
    let backend = backend_with_profiles();
    backend.set_session(Some(session_for("u1")));
    backend.fail(Op::Select, PROFILES);
    let provider = mount(&backend);
    let mut auth = provider.context();
    settle(&mut auth, |s| s.error.is_some()).await;

    backend.clear_failures();
    backend.sign_in(session_for("u2"));

    let state = settle(&mut auth, |s| s.profile == Some(profile("u2", "X"))).await;
    assert!(state.error.is_none());
    assert!(!state.is_loading);
    provider.unmount().await;
}

#[tokio::test]
async fn subscribe_failure_keeps_profile_and_records_error() {
    let backend = backend_with_profiles();
    backend.set_session(Some(session_for("u1")));
    backend.fail(Op::Subscribe, PROFILES);
    let provider = mount(&backend);
    let mut auth = provider.context();

    let state = settle(&mut auth, |s| !s.is_loading).await;

    assert_eq!(state.profile, Some(profile("u1", "A")));
    assert!(matches!(state.error, Some(SyncError::Subscribe(_))));
    assert!(backend.open_channels().is_empty());
    provider.unmount().await;
}

#[tokio::test]
async fn missing_profile_row_still_subscribes() {
    let backend = MemoryBackend::shared();
    backend.set_session(Some(session_for("u3")));
    let provider = mount(&backend);
    let mut auth = provider.context();

    let state = settle(&mut auth, |s| !s.is_loading).await;
    assert!(state.profile.is_none());
    assert!(state.error.is_none());
    assert_eq!(backend.open_channels().len(), 1);

    backend
        .insert(PROFILES, record(json!({ "user_id": "u3", "name": "New" })))
        .await
        .unwrap();
    settle(&mut auth, |s| s.profile == Some(profile("u3", "New"))).await;
    provider.unmount().await;
}

#[tokio::test]
async fn consumers_reach_the_provider_through_nested_scopes() {
    let backend = backend_with_profiles();
    backend.set_session(Some(session_for("u1")));
    let provider = mount(&backend);

    let root = Scope::root();
    assert_eq!(use_auth(&root).unwrap_err(), ContextError::MissingProvider);

    let app = provider.provide(&root);
    let deep = app.child().child();
    let mut auth = use_auth(&deep).unwrap();

    let state = settle(&mut auth, |s| !s.is_loading).await;
    assert_eq!(state.profile, Some(profile("u1", "A")));
    assert_eq!(auth.session(), Some(session_for("u1")));
    provider.unmount().await;
}
