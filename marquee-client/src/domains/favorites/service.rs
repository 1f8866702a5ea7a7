//! Favorites service
//!
//! Reads go through the shared [`QueryCache`] under `["favorites", <user>]`.
//! Writes hit the backend directly and invalidate exactly that key once they
//! succeed; nothing is updated optimistically.

use std::sync::Arc;

use marquee_config::TableConfig;
use marquee_model::{Favorite, Movie, MovieId, UserId};
use tracing::{debug, warn};

use super::errors::FavoritesError;
use crate::infrastructure::backend::{Backend, Filter, RowStore};
use crate::infrastructure::query_cache::{QueryCache, QueryKey};

const USER_COLUMN: &str = "user_id";
const MOVIE_COLUMN: &str = "movie_id";

/// Cache key of one user's favorites list.
pub fn favorites_key(user_id: &UserId) -> QueryKey {
    QueryKey::new(["favorites", user_id.as_str()])
}

/// Favorites operations for any user.
#[derive(Clone)]
pub struct FavoritesService {
    rows: Arc<dyn RowStore>,
    cache: Arc<QueryCache>,
    table: String,
}

impl std::fmt::Debug for FavoritesService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FavoritesService")
            .field("table", &self.table)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl FavoritesService {
    pub fn new(
        rows: Arc<dyn RowStore>,
        cache: Arc<QueryCache>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            rows,
            cache,
            table: table.into(),
        }
    }

    pub fn from_backend(backend: &Backend, cache: Arc<QueryCache>, tables: &TableConfig) -> Self {
        Self::new(backend.rows.clone(), cache, tables.favorites.clone())
    }

    /// Bind the operations to one user.
    pub fn for_user(&self, user_id: UserId) -> UserFavorites {
        UserFavorites {
            service: self.clone(),
            user_id,
        }
    }

    /// Every favorite of `user_id`, in stored order.
    pub async fn list_favorites(
        &self,
        user_id: &UserId,
    ) -> Result<Arc<Vec<Favorite>>, FavoritesError> {
        self.cache
            .fetch(&favorites_key(user_id), || self.load(user_id))
            .await
    }

    /// Drop the cached list and read it again.
    pub async fn refetch_favorites(
        &self,
        user_id: &UserId,
    ) -> Result<Arc<Vec<Favorite>>, FavoritesError> {
        self.cache.invalidate(&favorites_key(user_id));
        self.list_favorites(user_id).await
    }

    /// The cached list, if one is present and fresh.
    pub fn cached_favorites(&self, user_id: &UserId) -> Option<Arc<Vec<Favorite>>> {
        self.cache.get(&favorites_key(user_id))
    }

    /// Store `movie` as a favorite of `user_id`.
    pub async fn add_favorite(&self, user_id: &UserId, movie: Movie) -> Result<(), FavoritesError> {
        let movie_id = movie.movie_id;
        let record = Favorite::from_movie(user_id.clone(), movie)
            .into_record()
            .map_err(|e| {
                warn!(user = %user_id, %movie_id, error = %e, "could not encode favorite");
                FavoritesError::Insert
            })?;

        self.cache
            .mutate(&favorites_key(user_id), async {
                self.rows.insert(&self.table, record).await.map_err(|e| {
                    warn!(user = %user_id, %movie_id, error = %e, "favorite insert failed");
                    FavoritesError::Insert
                })
            })
            .await?;

        debug!(user = %user_id, %movie_id, "favorite added");
        Ok(())
    }

    /// Delete the favorite matching both ids; returns how many rows went.
    pub async fn remove_favorite(
        &self,
        user_id: &UserId,
        movie_id: MovieId,
    ) -> Result<usize, FavoritesError> {
        let filters = [
            Filter::eq(USER_COLUMN, user_id),
            Filter::eq(MOVIE_COLUMN, movie_id),
        ];
        let removed = self
            .cache
            .mutate(&favorites_key(user_id), async {
                self.rows
                    .delete_eq(&self.table, &filters)
                    .await
                    .map_err(|e| {
                        warn!(user = %user_id, %movie_id, error = %e, "favorite delete failed");
                        FavoritesError::Delete
                    })
            })
            .await?;

        debug!(user = %user_id, %movie_id, removed = removed.len(), "favorite removed");
        Ok(removed.len())
    }

    async fn load(&self, user_id: &UserId) -> Result<Vec<Favorite>, FavoritesError> {
        let rows = self
            .rows
            .select_eq(&self.table, &[Filter::eq(USER_COLUMN, user_id)])
            .await
            .map_err(|e| {
                warn!(user = %user_id, error = %e, "favorites fetch failed");
                FavoritesError::Fetch
            })?;

        rows.into_iter()
            .map(Favorite::from_record)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                warn!(user = %user_id, error = %e, "favorites row could not be decoded");
                FavoritesError::Fetch
            })
    }
}

/// The favorites operations bound to one user.
#[derive(Debug, Clone)]
pub struct UserFavorites {
    service: FavoritesService,
    user_id: UserId,
}

impl UserFavorites {
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub async fn list(&self) -> Result<Arc<Vec<Favorite>>, FavoritesError> {
        self.service.list_favorites(&self.user_id).await
    }

    pub async fn refetch(&self) -> Result<Arc<Vec<Favorite>>, FavoritesError> {
        self.service.refetch_favorites(&self.user_id).await
    }

    pub async fn add(&self, movie: Movie) -> Result<(), FavoritesError> {
        self.service.add_favorite(&self.user_id, movie).await
    }

    pub async fn remove(&self, movie_id: MovieId) -> Result<usize, FavoritesError> {
        self.service.remove_favorite(&self.user_id, movie_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::backend::{BackendError, MockRowStore};
    use marquee_model::Record;
    use serde_json::json;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn record(value: serde_json::Value) -> Record {
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!("test records are objects"),
        }
    }

    fn service(rows: MockRowStore) -> FavoritesService {
        FavoritesService::new(Arc::new(rows), Arc::new(QueryCache::new()), "favorites")
    }

    #[tokio::test]
    async fn fetch_failure_yields_generic_message() {
        let mut rows = MockRowStore::new();
        rows.expect_select_eq()
            .returning(|_, _| Err(BackendError::Injected("connection reset".into())));

        let err = service(rows).list_favorites(&user("u1")).await.unwrap_err();

        assert_eq!(err, FavoritesError::Fetch);
        assert_eq!(err.to_string(), "An error occurred while fetching the favorites.");
    }

    #[tokio::test]
    async fn undecodable_row_fails_the_whole_read() {
        let mut rows = MockRowStore::new();
        rows.expect_select_eq()
            .returning(|_, _| Ok(vec![record(json!({ "user_id": "u1" }))]));

        let err = service(rows).list_favorites(&user("u1")).await.unwrap_err();
        assert_eq!(err, FavoritesError::Fetch);
    }

    #[tokio::test]
    async fn insert_failure_yields_generic_message_and_keeps_cache() {
        let mut rows = MockRowStore::new();
        rows.expect_select_eq()
            .times(1)
            .returning(|_, _| Ok(vec![record(json!({ "user_id": "u1", "movie_id": 1 }))]));
        rows.expect_insert()
            .returning(|_, _| Err(BackendError::Status { status: 409, body: "dup".into() }));

        let favorites = service(rows).for_user(user("u1"));
        favorites.list().await.unwrap();

        let err = favorites.add(Movie::new(MovieId(2))).await.unwrap_err();
        assert_eq!(err.to_string(), "An error occurred while adding the favorite.");

        // Still served from cache: the select expectation allows one call.
        assert_eq!(favorites.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_failure_yields_generic_message() {
        let mut rows = MockRowStore::new();
        rows.expect_delete_eq()
            .returning(|_, _| Err(BackendError::NotAuthenticated));

        let err = service(rows)
            .remove_favorite(&user("u1"), MovieId(550))
            .await
            .unwrap_err();
        assert_eq!(err, FavoritesError::Delete);
        assert_eq!(err.to_string(), "An error occurred while removing the favorite.");
    }

    #[tokio::test]
    async fn insert_sends_movie_merged_with_owner() {
        let mut rows = MockRowStore::new();
        rows.expect_insert()
            .withf(|table, record| {
                table == "favorites"
                    && record.get("user_id") == Some(&json!("u1"))
                    && record.get("movie_id") == Some(&json!(550))
                    && record.get("title") == Some(&json!("Fight Club"))
            })
            .times(1)
            .returning(|_, record| Ok(vec![record]));

        service(rows)
            .add_favorite(
                &user("u1"),
                Movie::new(MovieId(550)).with_field("title", "Fight Club"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_filters_on_user_and_movie() {
        let mut rows = MockRowStore::new();
        rows.expect_delete_eq()
            .withf(|table, filters| {
                table == "favorites"
                    && filters
                        == [Filter::eq("user_id", "u1"), Filter::eq("movie_id", 550)]
            })
            .times(1)
            .returning(|_, _| Ok(Vec::new()));

        let removed = service(rows)
            .remove_favorite(&user("u1"), MovieId(550))
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }
}
