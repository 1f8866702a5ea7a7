//! Core data model definitions shared across Marquee crates.
//!
//! Rows travel between the client and the hosted backend as JSON objects
//! ([`Record`]). The types here give the handful of columns the client
//! actually reads a name and a type, and carry every other column through
//! untouched.
#![allow(missing_docs)]

pub mod error;
pub mod ids;
pub mod movie;
pub mod profile;
pub mod row_change;
pub mod session;

pub use error::{ModelError, Result as ModelResult};
pub use ids::{MovieId, UserId};
pub use movie::{Favorite, Movie};
pub use profile::UserProfile;
pub use row_change::{ChangeKind, Record, RowChange};
pub use session::{AuthChange, AuthEventKind, AuthUser, Session};
