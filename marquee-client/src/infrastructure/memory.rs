//! In-process backend
//!
//! Implements every backend trait against in-memory tables. Mutations made
//! through it are echoed to matching change subscriptions, which makes it a
//! faithful stand-in for the hosted backend plus its realtime service in
//! tests and offline demos. Fault injection (`fail`, `set_session_error`)
//! and latency control (`hold`, `hold_session`) let tests reproduce error paths and
//! out-of-order completions deterministically.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use marquee_model::{AuthChange, ChangeKind, Record, RowChange, Session};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use super::backend::{
    AuthGateway, BackendError, BackendResult, ChangeFeed, ChannelSpec, Filter,
    RowStore,
};
use super::subscription::{ListenerHub, Subscription};

/// Backend operations that can be failed or counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Select,
    Insert,
    Delete,
    Subscribe,
}

/// Holds matching reads until released (or dropped).
#[derive(Debug)]
pub struct Gate {
    tx: watch::Sender<bool>,
}

impl Gate {
    pub fn release(&self) {
        self.tx.send_replace(true);
    }
}

struct HeldSelect {
    table: String,
    filter: Filter,
    open: watch::Receiver<bool>,
}

pub struct MemoryBackend {
    schema: String,
    tables: Mutex<HashMap<String, Vec<Record>>>,
    session: Mutex<Option<Session>>,
    session_error: Mutex<Option<String>>,
    failures: Mutex<HashSet<(Op, String)>>,
    held: Mutex<Vec<HeldSelect>>,
    held_session: Mutex<Option<watch::Receiver<bool>>>,
    calls: Mutex<HashMap<(Op, String), usize>>,
    auth_hub: Arc<ListenerHub<AuthChange>>,
    change_hub: Arc<ListenerHub<RowChange>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_schema("public")
    }

    pub fn with_schema(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            tables: Mutex::new(HashMap::new()),
            session: Mutex::new(None),
            session_error: Mutex::new(None),
            failures: Mutex::new(HashSet::new()),
            held: Mutex::new(Vec::new()),
            held_session: Mutex::new(None),
            calls: Mutex::new(HashMap::new()),
            auth_hub: ListenerHub::new(),
            change_hub: ListenerHub::new(),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    // ----- table state -------------------------------------------------

    /// Append rows without emitting change events.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Record>) {
        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables.lock().get(table).cloned().unwrap_or_default()
    }

    /// Merge `patch` into every matching row and emit an update per row.
    pub fn update_eq(&self, table: &str, filters: &[Filter], patch: Record) -> Vec<Record> {
        let changed: Vec<(Record, Record)> = {
            let mut tables = self.tables.lock();
            let rows = tables.entry(table.to_string()).or_default();
            rows.iter_mut()
                .filter(|row| filters.iter().all(|f| f.matches(row)))
                .map(|row| {
                    let old = row.clone();
                    for (key, value) in &patch {
                        row.insert(key.clone(), value.clone());
                    }
                    (old, row.clone())
                })
                .collect()
        };
        for (old, new) in &changed {
            self.emit_change(
                table,
                ChangeKind::Update,
                Some(new.clone()),
                Some(old.clone()),
            );
        }
        changed.into_iter().map(|(_, new)| new).collect()
    }

    // ----- auth state --------------------------------------------------

    /// Replace the stored session silently (no auth event).
    pub fn set_session(&self, session: Option<Session>) {
        *self.session.lock() = session;
    }

    /// Make `get_session` fail with `message` until cleared.
    pub fn set_session_error(&self, message: Option<&str>) {
        *self.session_error.lock() = message.map(str::to_string);
    }

    /// Store the change's session and notify auth subscribers.
    pub fn emit_auth(&self, change: AuthChange) -> usize {
        *self.session.lock() = change.session.clone();
        debug!(event = ?change.event, "memory backend auth event");
        self.auth_hub.publish(&change)
    }

    pub fn sign_in(&self, session: Session) -> usize {
        self.emit_auth(AuthChange::signed_in(session))
    }

    pub fn sign_out(&self) -> usize {
        self.emit_auth(AuthChange::signed_out())
    }

    // ----- fault and latency injection ---------------------------------

    pub fn fail(&self, op: Op, table: &str) {
        self.failures.lock().insert((op, table.to_string()));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Hold selects on `table` whose filters include `filter` until the
    /// returned gate is released or dropped.
    pub fn hold(&self, table: &str, filter: Filter) -> Gate {
        let (tx, open) = watch::channel(false);
        self.held.lock().push(HeldSelect {
            table: table.to_string(),
            filter,
            open,
        });
        Gate { tx }
    }

    /// Hold `get_session` calls until the returned gate is released or
    /// dropped. The session is read when the call starts, so a held call
    /// resolves to whatever was stored at that moment.
    pub fn hold_session(&self) -> Gate {
        let (tx, open) = watch::channel(false);
        *self.held_session.lock() = Some(open);
        Gate { tx }
    }

    // ----- inspection --------------------------------------------------

    pub fn calls(&self, op: Op, table: &str) -> usize {
        self.calls
            .lock()
            .get(&(op, table.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Labels of open change subscriptions.
    pub fn open_channels(&self) -> Vec<String> {
        self.change_hub.open_labels()
    }

    pub fn channels_closed(&self) -> usize {
        self.change_hub.closed_total()
    }

    pub fn auth_listeners(&self) -> usize {
        self.auth_hub.open_count()
    }

    // ----- internals ---------------------------------------------------

    fn record_call(&self, op: Op, table: &str) -> BackendResult<()> {
        *self.calls.lock().entry((op, table.to_string())).or_insert(0) += 1;
        if self.failures.lock().contains(&(op, table.to_string())) {
            return Err(BackendError::Injected(format!("{op:?} on {table}")));
        }
        Ok(())
    }

    fn held_gate(&self, table: &str, filters: &[Filter]) -> Option<watch::Receiver<bool>> {
        self.held
            .lock()
            .iter()
            .find(|held| held.table == table && filters.contains(&held.filter))
            .map(|held| held.open.clone())
    }

    fn emit_change(
        &self,
        table: &str,
        kind: ChangeKind,
        new: Option<Record>,
        old: Option<Record>,
    ) {
        let change = RowChange {
            kind,
            schema: self.schema.clone(),
            table: table.to_string(),
            new,
            old,
        };
        let delivered = self.change_hub.publish(&change);
        debug!(table, ?kind, delivered, "memory backend row change");
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("schema", &self.schema)
            .field("tables", &self.tables.lock().len())
            .field("auth_hub", &self.auth_hub)
            .field("change_hub", &self.change_hub)
            .finish()
    }
}

#[async_trait]
impl RowStore for MemoryBackend {
    async fn select_eq(&self, table: &str, filters: &[Filter]) -> BackendResult<Vec<Record>> {
        self.record_call(Op::Select, table)?;
        if let Some(mut open) = self.held_gate(table, filters) {
            // A dropped gate counts as released.
            let _ = open.wait_for(|released| *released).await;
        }
        Ok(self
            .rows(table)
            .into_iter()
            .filter(|row| filters.iter().all(|f| f.matches(row)))
            .collect())
    }

    async fn insert(&self, table: &str, record: Record) -> BackendResult<Vec<Record>> {
        self.record_call(Op::Insert, table)?;
        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .push(record.clone());
        self.emit_change(table, ChangeKind::Insert, Some(record.clone()), None);
        Ok(vec![record])
    }

    async fn delete_eq(&self, table: &str, filters: &[Filter]) -> BackendResult<Vec<Record>> {
        self.record_call(Op::Delete, table)?;
        let removed: Vec<Record> = {
            let mut tables = self.tables.lock();
            let rows = tables.entry(table.to_string()).or_default();
            let (removed, kept): (Vec<Record>, Vec<Record>) = rows
                .drain(..)
                .partition(|row| filters.iter().all(|f| f.matches(row)));
            *rows = kept;
            removed
        };
        for row in &removed {
            self.emit_change(table, ChangeKind::Delete, None, Some(row.clone()));
        }
        Ok(removed)
    }
}

#[async_trait]
impl AuthGateway for MemoryBackend {
    async fn get_session(&self) -> BackendResult<Option<Session>> {
        let result = match self.session_error.lock().clone() {
            Some(message) => Err(BackendError::Injected(message)),
            None => Ok(self.session.lock().clone()),
        };
        let gate = self.held_session.lock().clone();
        if let Some(mut open) = gate {
            let _ = open.wait_for(|released| *released).await;
        }
        result
    }

    async fn on_auth_state_change(&self) -> BackendResult<Subscription<AuthChange>> {
        Ok(self.auth_hub.register("auth", |_| true))
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, spec: ChannelSpec) -> BackendResult<Subscription<RowChange>> {
        self.record_call(Op::Subscribe, &spec.table)?;
        let label = spec.label();
        Ok(self
            .change_hub
            .register(label, move |change| spec.admits(change)))
    }
}
