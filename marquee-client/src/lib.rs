//! Marquee client data layer
//!
//! Two consumer-facing pieces sit on top of the hosted backend:
//!
//! - [`domains::favorites`]: the signed-in user's favorite movies, read
//!   through a keyed [`QueryCache`](infrastructure::QueryCache) and
//!   invalidated after every successful write.
//! - [`domains::auth`]: an [`AuthProvider`](domains::auth::AuthProvider) that
//!   keeps the current session and the user's profile row in sync with auth
//!   events and live row changes, exposed to consumers through
//!   [`use_auth`](domains::auth::use_auth).
//!
//! Backend access goes through the traits in [`infrastructure::backend`];
//! [`RestBackend`](infrastructure::RestBackend) talks HTTP and
//! [`MemoryBackend`](infrastructure::MemoryBackend) runs in-process.

pub mod domains;
pub mod infrastructure;

pub use domains::auth::{
    AuthContext, AuthProvider, ContextError, ProviderSettings, Scope, SyncError,
    SyncState, use_auth,
};
pub use domains::favorites::{FavoritesError, FavoritesService, UserFavorites};
pub use infrastructure::{Backend, MemoryBackend, QueryCache, QueryKey, RestBackend};
