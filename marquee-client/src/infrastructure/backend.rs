//! Backend collaborator traits
//!
//! The hosted backend exposes three independent capabilities: equality
//! filtered row access, the auth session, and a row-change feed. Each one is a
//! trait so the adapters above can be driven by the REST client in production
//! and by [`MemoryBackend`](super::memory::MemoryBackend) in tests.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use marquee_model::{AuthChange, Record, RowChange, Session};
use thiserror::Error;

use super::subscription::Subscription;

pub type BackendResult<T> = Result<T, BackendError>;

/// Errors reported by a backend implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid backend url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode backend response: {0}")]
    Decode(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("subscription {0} is not open")]
    SubscriptionClosed(String),

    /// Failure injected by a test backend.
    #[error("injected failure: {0}")]
    Injected(String),
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Decode(err.to_string())
    }
}

/// A single `column = value` equality filter.
///
/// Renders in the hosted API's filter syntax, `column=eq.value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            value: value.to_string(),
        }
    }

    /// The `eq.value` half, as used in REST query strings.
    pub fn operand(&self) -> String {
        format!("eq.{}", self.value)
    }

    /// True when `record[column]` equals the filter value.
    ///
    /// Strings compare verbatim; numbers and booleans compare by their JSON
    /// rendering so `movie_id=eq.550` matches the number `550`.
    pub fn matches(&self, record: &Record) -> bool {
        match record.get(&self.column) {
            Some(serde_json::Value::String(s)) => *s == self.value,
            Some(serde_json::Value::Null) | None => false,
            Some(other) => other.to_string() == self.value,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

/// Which row events a channel wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EventFilter {
    #[default]
    All,
    Insert,
    Update,
    Delete,
}

impl EventFilter {
    pub fn admits(self, kind: marquee_model::ChangeKind) -> bool {
        use marquee_model::ChangeKind;
        match self {
            EventFilter::All => true,
            EventFilter::Insert => kind == ChangeKind::Insert,
            EventFilter::Update => kind == ChangeKind::Update,
            EventFilter::Delete => kind == ChangeKind::Delete,
        }
    }
}

/// Description of a row-change channel: one table, optionally narrowed to
/// rows matching a filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelSpec {
    pub schema: String,
    pub table: String,
    pub filter: Option<Filter>,
    pub event: EventFilter,
}

impl ChannelSpec {
    pub fn table(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            filter: None,
            event: EventFilter::All,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_event(mut self, event: EventFilter) -> Self {
        self.event = event;
        self
    }

    /// Channel topic in the hosted realtime naming scheme.
    pub fn topic(&self) -> String {
        format!("{}:{}", self.schema, self.table)
    }

    /// Human-readable channel name, e.g. `public:user_profiles?user_id=eq.u1`.
    pub fn label(&self) -> String {
        match &self.filter {
            Some(filter) => format!("{}?{}", self.topic(), filter),
            None => self.topic(),
        }
    }

    /// Whether `change` should be delivered on this channel.
    pub fn admits(&self, change: &RowChange) -> bool {
        if change.schema != self.schema || change.table != self.table {
            return false;
        }
        if !self.event.admits(change.kind) {
            return false;
        }
        match &self.filter {
            None => true,
            Some(filter) => change
                .new_row()
                .or(change.old.as_ref())
                .is_some_and(|row| filter.matches(row)),
        }
    }
}

/// Equality-filtered table access.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Select every row of `table` matching all `filters`, in stored order.
    async fn select_eq(
        &self,
        table: &str,
        filters: &[Filter],
    ) -> BackendResult<Vec<Record>>;

    /// Insert one row, returning the stored representation.
    async fn insert(&self, table: &str, record: Record) -> BackendResult<Vec<Record>>;

    /// Delete every row matching all `filters`, returning the deleted rows.
    async fn delete_eq(
        &self,
        table: &str,
        filters: &[Filter],
    ) -> BackendResult<Vec<Record>>;
}

/// Session access and auth-state notifications.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    /// The current session, if any.
    async fn get_session(&self) -> BackendResult<Option<Session>>;

    /// Register for login/logout/refresh notifications.
    async fn on_auth_state_change(&self) -> BackendResult<Subscription<AuthChange>>;
}

/// Live row-change notifications.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, spec: ChannelSpec) -> BackendResult<Subscription<RowChange>>;
}

/// Shared handle to the backend collaborators.
#[derive(Clone)]
pub struct Backend {
    pub rows: Arc<dyn RowStore>,
    pub auth: Arc<dyn AuthGateway>,
    pub changes: Arc<dyn ChangeFeed>,
}

impl Backend {
    pub fn new(
        rows: Arc<dyn RowStore>,
        auth: Arc<dyn AuthGateway>,
        changes: Arc<dyn ChangeFeed>,
    ) -> Self {
        Self {
            rows,
            auth,
            changes,
        }
    }

    /// Use one implementation for all three capabilities.
    pub fn from_shared<B>(backend: Arc<B>) -> Self
    where
        B: RowStore + AuthGateway + ChangeFeed + 'static,
    {
        Self {
            rows: backend.clone(),
            auth: backend.clone(),
            changes: backend,
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend").finish_non_exhaustive()
    }
}
