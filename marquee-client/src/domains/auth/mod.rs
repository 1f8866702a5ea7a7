//! Session and profile synchronization
//!
//! [`AuthProvider`] keeps the current session and the signed-in user's profile
//! row up to date. Consumers read it through an [`AuthContext`] obtained with
//! [`use_auth`] from a [`Scope`] the provider was attached to.

pub mod context;
pub mod errors;
pub mod provider;
pub mod state_types;

pub use context::{AuthContext, Scope, use_auth};
pub use errors::{ContextError, SyncError};
pub use provider::{AuthProvider, ProviderSettings};
pub use state_types::{SyncState, SyncStateStore};
