//! Consumer-facing domains.

pub mod auth;
pub mod favorites;
