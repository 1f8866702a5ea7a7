//! Session/profile synchronizer
//!
//! [`AuthProvider::mount`] spawns one actor task that owns [`SyncState`] and
//! is its only writer. The actor reacts to four inputs: shutdown, completed
//! fetches, auth-state events, and row changes on the profile channel.
//!
//! Every fetch is tagged with the identity generation current when it was
//! started. Auth-state events bump the generation, so a fetch started for a
//! previous identity resolves into a result that is counted and discarded.
//! At most one profile channel is open at any time, and the old one is
//! closed before a new one is opened.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use marquee_config::TableConfig;
use marquee_config::models::{DEFAULT_PROFILES_TABLE, DEFAULT_SCHEMA};
use marquee_model::{AuthChange, ChangeKind, Record, RowChange, Session, UserId, UserProfile};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use super::context::{AuthContext, Scope};
use super::errors::SyncError;
use super::state_types::{SyncState, SyncStateStore};
use crate::infrastructure::backend::{Backend, BackendResult, ChannelSpec, Filter};
use crate::infrastructure::subscription::Subscription;

const USER_COLUMN: &str = "user_id";

/// Where the profile rows live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub schema: String,
    pub profile_table: String,
}

impl ProviderSettings {
    pub fn from_tables(tables: &TableConfig) -> Self {
        Self {
            schema: tables.schema.clone(),
            profile_table: tables.profiles.clone(),
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
            profile_table: DEFAULT_PROFILES_TABLE.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct SyncStats {
    stale_results: AtomicU64,
}

/// Handle to a mounted synchronizer.
///
/// Dropping the handle stops the synchronizer in the background; use
/// [`unmount`](Self::unmount) to wait for its teardown.
#[derive(Debug)]
pub struct AuthProvider {
    store: SyncStateStore,
    stats: Arc<SyncStats>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl AuthProvider {
    /// Start synchronizing. Must be called from within a Tokio runtime.
    pub fn mount(backend: Backend, settings: ProviderSettings) -> Self {
        let store = SyncStateStore::new();
        let stats = Arc::new(SyncStats::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let synchronizer = Synchronizer::new(backend, settings, store.clone(), stats.clone());
        let task = tokio::spawn(
            synchronizer
                .run(shutdown_rx)
                .instrument(info_span!("auth_provider")),
        );

        Self {
            store,
            stats,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// A reader over this provider's state.
    pub fn context(&self) -> AuthContext {
        AuthContext::new(self.store.subscribe())
    }

    /// Child of `parent` through which descendants reach this provider.
    pub fn provide(&self, parent: &Scope) -> Scope {
        parent.provide(self.context())
    }

    pub fn state(&self) -> SyncState {
        self.store.current()
    }

    /// Fetch results discarded because a newer identity superseded them.
    pub fn stale_results(&self) -> u64 {
        self.stats.stale_results.load(Ordering::Relaxed)
    }

    /// Stop synchronizing and wait until every subscription is closed.
    pub async fn unmount(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "synchronizer task failed");
        }
    }
}

impl Drop for AuthProvider {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// A fetch outcome, tagged with the generation it was started under.
enum Fetched {
    Session {
        generation: u64,
        result: BackendResult<Option<Session>>,
    },
    Profile {
        generation: u64,
        user_id: UserId,
        result: BackendResult<Vec<Record>>,
    },
}

impl Fetched {
    fn generation(&self) -> u64 {
        match self {
            Fetched::Session { generation, .. } | Fetched::Profile { generation, .. } => {
                *generation
            }
        }
    }
}

struct Synchronizer {
    backend: Backend,
    settings: ProviderSettings,
    store: SyncStateStore,
    stats: Arc<SyncStats>,
    generation: u64,
    identity: Option<UserId>,
    profile_channel: Option<Subscription<RowChange>>,
    fetched_tx: mpsc::UnboundedSender<Fetched>,
    fetched_rx: mpsc::UnboundedReceiver<Fetched>,
}

impl Synchronizer {
    fn new(
        backend: Backend,
        settings: ProviderSettings,
        store: SyncStateStore,
        stats: Arc<SyncStats>,
    ) -> Self {
        let (fetched_tx, fetched_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            settings,
            store,
            stats,
            generation: 0,
            identity: None,
            profile_channel: None,
            fetched_tx,
            fetched_rx,
        }
    }

    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        // Subscribe before fetching so no change between the two is missed.
        let mut auth_events = match self.backend.auth.on_auth_state_change().await {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                warn!(error = %e, "auth-state subscription failed; session changes will not be observed");
                None
            }
        };
        self.start_session_fetch();

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break,

                Some(fetched) = self.fetched_rx.recv() => self.on_fetched(fetched).await,

                event = next_event(&mut auth_events) => match event {
                    Some(change) => self.on_auth_change(change).await,
                    None => {
                        warn!("auth-state stream ended");
                        if let Some(ended) = auth_events.take() {
                            let _ = ended.close().await;
                        }
                    }
                },

                change = next_event(&mut self.profile_channel) => match change {
                    Some(change) => self.on_profile_change(change),
                    None => {
                        warn!("profile channel ended");
                        self.close_profile_channel().await;
                    }
                },
            }
        }

        self.close_profile_channel().await;
        if let Some(auth_events) = auth_events
            && let Err(e) = auth_events.close().await
        {
            warn!(error = %e, "closing auth-state subscription failed");
        }
        info!("synchronizer stopped");
    }

    fn start_session_fetch(&self) {
        let generation = self.generation;
        let auth = self.backend.auth.clone();
        let tx = self.fetched_tx.clone();
        tokio::spawn(async move {
            let result = auth.get_session().await;
            let _ = tx.send(Fetched::Session { generation, result });
        });
    }

    fn start_profile_fetch(&self, user_id: UserId) {
        let generation = self.generation;
        let rows = self.backend.rows.clone();
        let table = self.settings.profile_table.clone();
        let tx = self.fetched_tx.clone();
        debug!(user = %user_id, generation, "fetching profile");
        tokio::spawn(async move {
            let result = rows
                .select_eq(&table, &[Filter::eq(USER_COLUMN, &user_id)])
                .await;
            let _ = tx.send(Fetched::Profile {
                generation,
                user_id,
                result,
            });
        });
    }

    async fn on_fetched(&mut self, fetched: Fetched) {
        if fetched.generation() != self.generation {
            self.stats.stale_results.fetch_add(1, Ordering::Relaxed);
            debug!(
                started = fetched.generation(),
                current = self.generation,
                "discarding stale fetch result"
            );
            return;
        }

        match fetched {
            Fetched::Session { result, .. } => match result {
                Ok(session) => self.enter_session(session, None),
                Err(e) => {
                    warn!(error = %e, "session fetch failed");
                    self.enter_session(None, Some(SyncError::SessionFetch(e.to_string())));
                }
            },
            Fetched::Profile {
                user_id, result, ..
            } => self.on_profile_fetched(user_id, result).await,
        }
    }

    async fn on_auth_change(&mut self, change: AuthChange) {
        self.generation += 1;
        debug!(event = ?change.event, generation = self.generation, "auth state changed");
        self.close_profile_channel().await;
        self.enter_session(change.session, None);
    }

    /// Adopt `session` as the current identity and start loading its profile.
    fn enter_session(&mut self, session: Option<Session>, error: Option<SyncError>) {
        let user_id = session.as_ref().and_then(Session::user_id).cloned();
        self.identity = user_id.clone();

        self.store.update(|state| {
            state.session = session;
            state.profile = None;
            state.error = error;
            state.is_loading = user_id.is_some();
        });

        match user_id {
            Some(user_id) => self.start_profile_fetch(user_id),
            None => debug!("no signed-in user"),
        }
    }

    async fn on_profile_fetched(&mut self, user_id: UserId, result: BackendResult<Vec<Record>>) {
        let profile = match result {
            Ok(rows) => rows.into_iter().next().map(UserProfile::from_record).transpose(),
            Err(e) => {
                warn!(user = %user_id, error = %e, "profile fetch failed");
                self.store.update(|state| {
                    state.profile = None;
                    state.error = Some(SyncError::ProfileFetch(e.to_string()));
                    state.is_loading = false;
                });
                return;
            }
        };

        let profile = match profile {
            Ok(profile) => profile,
            Err(e) => {
                warn!(user = %user_id, error = %e, "profile row could not be decoded");
                self.store.update(|state| {
                    state.profile = None;
                    state.error = Some(SyncError::ProfileFetch(e.to_string()));
                    state.is_loading = false;
                });
                return;
            }
        };

        if profile.is_none() {
            debug!(user = %user_id, "user has no profile row yet");
        }
        let subscribe_error = self.open_profile_channel(&user_id).await.err();

        self.store.update(|state| {
            state.profile = profile;
            state.is_loading = false;
            if subscribe_error.is_some() {
                state.error = subscribe_error;
            }
        });
    }

    async fn open_profile_channel(&mut self, user_id: &UserId) -> Result<(), SyncError> {
        self.close_profile_channel().await;

        let spec = ChannelSpec::table(&self.settings.schema, &self.settings.profile_table)
            .with_filter(Filter::eq(USER_COLUMN, user_id));
        match self.backend.changes.subscribe(spec).await {
            Ok(channel) => {
                debug!(id = %channel.id(), label = channel.label(), "profile channel open");
                self.profile_channel = Some(channel);
                Ok(())
            }
            Err(e) => {
                warn!(user = %user_id, error = %e, "profile channel could not be opened");
                Err(SyncError::Subscribe(e.to_string()))
            }
        }
    }

    async fn close_profile_channel(&mut self) {
        if let Some(channel) = self.profile_channel.take() {
            let id = channel.id();
            match channel.close().await {
                Ok(()) => debug!(%id, "profile channel closed"),
                Err(e) => warn!(%id, error = %e, "closing profile channel failed"),
            }
        }
    }

    fn on_profile_change(&mut self, change: RowChange) {
        let Some(identity) = &self.identity else {
            return;
        };
        let owner = Filter::eq(USER_COLUMN, identity);
        let belongs = change
            .new_row()
            .or(change.old.as_ref())
            .is_some_and(|row| owner.matches(row));
        if !belongs {
            trace!(kind = ?change.kind, "ignoring change for another user");
            return;
        }

        if change.kind == ChangeKind::Delete {
            debug!(user = %identity, "profile row deleted");
            self.store.update(|state| state.profile = None);
            return;
        }

        let Some(row) = change.new_row() else {
            return;
        };
        match UserProfile::from_record(row.clone()) {
            Ok(profile) => {
                debug!(user = %identity, kind = ?change.kind, "profile updated live");
                self.store.update(|state| state.profile = Some(profile));
            }
            Err(e) => warn!(user = %identity, error = %e, "live profile row could not be decoded"),
        }
    }
}

/// Next event of an optional subscription; pends forever when there is none.
async fn next_event<T>(subscription: &mut Option<Subscription<T>>) -> Option<T> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}
