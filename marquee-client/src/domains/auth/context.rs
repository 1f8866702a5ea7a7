//! Scoped context lookup
//!
//! A [`Scope`] is one node of a parent-linked tree. Each node may carry
//! values keyed by type; lookups walk towards the root and return the nearest
//! one. Providers attach themselves with [`Scope::provide`], consumers read
//! with [`Scope::get`] or, for the auth context, [`use_auth`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use marquee_model::{Session, UserProfile};
use tokio::sync::watch;

use super::errors::{ContextError, SyncError};
use super::state_types::SyncState;

type Values = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

#[derive(Default)]
struct Node {
    parent: Option<Scope>,
    values: Values,
}

#[derive(Clone, Default)]
pub struct Scope {
    node: Arc<Node>,
}

impl Scope {
    pub fn root() -> Self {
        Self::default()
    }

    /// Child scope with no values of its own.
    pub fn child(&self) -> Self {
        Self {
            node: Arc::new(Node {
                parent: Some(self.clone()),
                values: Values::new(),
            }),
        }
    }

    /// Child scope carrying `value`, shadowing any ancestor value of the
    /// same type.
    pub fn provide<T>(&self, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        let mut values = Values::new();
        values.insert(TypeId::of::<T>(), Arc::new(value));
        Self {
            node: Arc::new(Node {
                parent: Some(self.clone()),
                values,
            }),
        }
    }

    /// Nearest value of type `T` on the path to the root.
    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if let Some(value) = current.node.values.get(&TypeId::of::<T>()) {
                return value.clone().downcast::<T>().ok();
            }
            scope = current.node.parent.as_ref();
        }
        None
    }

    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut parent = self.node.parent.as_ref();
        while let Some(scope) = parent {
            depth += 1;
            parent = scope.node.parent.as_ref();
        }
        depth
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("depth", &self.depth())
            .field("values", &self.node.values.len())
            .finish()
    }
}

/// Read access to an [`AuthProvider`](super::AuthProvider)'s state.
#[derive(Debug, Clone)]
pub struct AuthContext {
    state: watch::Receiver<SyncState>,
}

impl AuthContext {
    pub(crate) fn new(state: watch::Receiver<SyncState>) -> Self {
        Self { state }
    }

    pub fn snapshot(&self) -> SyncState {
        self.state.borrow().clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.state.borrow().session.clone()
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.state.borrow().profile.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn error(&self) -> Option<SyncError> {
        self.state.borrow().error.clone()
    }

    /// Wait for the next state change. Returns `false` once the provider is
    /// gone and no further changes can happen.
    pub async fn changed(&mut self) -> bool {
        self.state.changed().await.is_ok()
    }

    /// Wait until the state satisfies `predicate` (checked against the
    /// current state first). `None` if the provider went away first.
    pub async fn wait_for<F>(&mut self, predicate: F) -> Option<SyncState>
    where
        F: FnMut(&SyncState) -> bool,
    {
        self.state
            .wait_for(predicate)
            .await
            .ok()
            .map(|state| state.clone())
    }

    /// Wait until loading has finished.
    pub async fn settled(&mut self) -> Option<SyncState> {
        self.wait_for(SyncState::is_settled).await
    }
}

/// The auth context of the nearest enclosing provider.
pub fn use_auth(scope: &Scope) -> Result<AuthContext, ContextError> {
    scope
        .get::<AuthContext>()
        .map(|context| (*context).clone())
        .ok_or(ContextError::MissingProvider)
}
