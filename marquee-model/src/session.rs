use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Identity attached to a session by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
}

/// Login session issued by the hosted auth service.
///
/// Held by value in client state and replaced wholesale on every auth-state
/// change; the client only ever looks at `user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: Option<AuthUser>,
}

impl Session {
    pub fn for_user(access_token: impl Into<String>, user: AuthUser) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: Some("bearer".to_string()),
            expires_at: None,
            user: Some(user),
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user.as_ref().map(|u| &u.id)
    }

    /// True once `expires_at` is within `leeway_secs` of now.
    pub fn expires_within(&self, leeway_secs: i64) -> bool {
        match self.expires_at {
            Some(at) => at - chrono::Duration::seconds(leeway_secs) <= Utc::now(),
            None => false,
        }
    }
}

/// Why an auth-state notification fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEventKind {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

/// Notification delivered to auth-state subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthChange {
    pub event: AuthEventKind,
    pub session: Option<Session>,
}

impl AuthChange {
    pub fn signed_in(session: Session) -> Self {
        Self {
            event: AuthEventKind::SignedIn,
            session: Some(session),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            event: AuthEventKind::SignedOut,
            session: None,
        }
    }
}
