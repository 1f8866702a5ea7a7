//! Synchronizer state and its watch-backed store

use std::sync::Arc;

use marquee_model::{Session, UserId, UserProfile};
use tokio::sync::watch;

use super::errors::SyncError;

/// What consumers of the auth context see.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState {
    pub session: Option<Session>,
    pub profile: Option<UserProfile>,
    pub is_loading: bool,
    pub error: Option<SyncError>,
}

impl SyncState {
    /// State before the first session fetch resolves.
    pub fn initial() -> Self {
        Self {
            session: None,
            profile: None,
            is_loading: true,
            error: None,
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.session.as_ref().and_then(Session::user_id)
    }

    pub fn is_settled(&self) -> bool {
        !self.is_loading
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::initial()
    }
}

/// Single-writer state store; readers get cheap snapshots and change
/// notifications through a watch channel.
#[derive(Clone, Debug)]
pub struct SyncStateStore {
    sender: Arc<watch::Sender<SyncState>>,
    receiver: watch::Receiver<SyncState>,
}

impl SyncStateStore {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(SyncState::initial());
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn current(&self) -> SyncState {
        self.receiver.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.sender.subscribe()
    }

    /// Mutate in place; readers are only woken if something changed.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut SyncState),
    {
        self.sender.send_if_modified(|state| {
            let before = state.clone();
            f(state);
            *state != before
        });
    }
}

impl Default for SyncStateStore {
    fn default() -> Self {
        Self::new()
    }
}
