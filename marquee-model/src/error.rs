use std::fmt::{self, Display};

/// Errors produced while converting rows to and from model types.
#[derive(Debug)]
pub enum ModelError {
    Decode(serde_json::Error),
    NotAnObject(&'static str),
    InvalidId(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Decode(err) => write!(f, "decode error: {err}"),
            ModelError::NotAnObject(what) => {
                write!(f, "{what} did not serialize to a JSON object")
            }
            ModelError::InvalidId(msg) => write!(f, "invalid id: {msg}"),
        }
    }
}

impl std::error::Error for ModelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ModelError::Decode(err) => Some(err),
            ModelError::NotAnObject(_) | ModelError::InvalidId(_) => None,
        }
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Decode(err)
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
