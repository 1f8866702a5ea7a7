//! Favorites domain
//!
//! Per-user list of favorite movies backed by the favorites table.

pub mod errors;
pub mod service;

pub use errors::FavoritesError;
pub use service::{FavoritesService, UserFavorites, favorites_key};
