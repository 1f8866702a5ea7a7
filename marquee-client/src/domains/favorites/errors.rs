//! Favorites error types
//!
//! Callers get one generic message per operation. The backend cause is
//! logged where it happens and not carried along.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FavoritesError {
    /// Listing failed, or a stored row could not be decoded
    #[error("An error occurred while fetching the favorites.")]
    Fetch,

    #[error("An error occurred while adding the favorite.")]
    Insert,

    #[error("An error occurred while removing the favorite.")]
    Delete,
}
