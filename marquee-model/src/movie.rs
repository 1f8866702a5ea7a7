use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::ids::{MovieId, UserId};
use crate::row_change::Record;

/// A movie as the UI hands it to the favorites list.
///
/// Only `movie_id` is interpreted; title, poster path, release date and the
/// rest travel in `fields` and are stored verbatim in the favorites row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub movie_id: MovieId,
    #[serde(flatten)]
    pub fields: Record,
}

impl Movie {
    pub fn new(movie_id: MovieId) -> Self {
        Self {
            movie_id,
            fields: Record::new(),
        }
    }

    /// Builder-style helper for attaching an opaque column.
    pub fn with_field(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.fields.get("title").and_then(|v| v.as_str())
    }
}

/// One row of the favorites table: a movie pinned by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    pub user_id: UserId,
    pub movie_id: MovieId,
    #[serde(flatten)]
    pub fields: Record,
}

impl Favorite {
    /// Merge a movie with its owner. The owner column always wins over a
    /// `user_id` key smuggled in through the movie's opaque fields.
    pub fn from_movie(user_id: UserId, movie: Movie) -> Self {
        let mut fields = movie.fields;
        fields.remove("user_id");
        fields.remove("movie_id");
        Self {
            user_id,
            movie_id: movie.movie_id,
            fields,
        }
    }

    pub fn from_record(record: Record) -> Result<Self> {
        Ok(serde_json::from_value(serde_json::Value::Object(record))?)
    }

    pub fn into_record(self) -> Result<Record> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(ModelError::NotAnObject("favorite")),
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.fields.get("title").and_then(|v| v.as_str())
    }
}
