//! Synchronizer error types
//!
//! [`SyncError`] never escapes as a `Result`; it is recorded in
//! [`SyncState::error`](super::SyncState) so one failed fetch cannot take
//! down the consumers. [`ContextError`] is returned straight to the caller.

use thiserror::Error;

/// Failure recorded by the synchronizer, carrying the rendered cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("could not fetch the session: {0}")]
    SessionFetch(String),

    #[error("could not fetch the profile: {0}")]
    ProfileFetch(String),

    #[error("could not subscribe to profile changes: {0}")]
    Subscribe(String),
}

/// Misuse of the auth context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// No enclosing scope carries an auth provider
    #[error("useAuth must be used within an AuthProvider")]
    MissingProvider,
}
