use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ids::UserId;
use crate::row_change::Record;

/// The `user_profiles` row belonging to a signed-in user.
///
/// Keyed by `user_id`; display name, avatar and preferences are opaque here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    #[serde(flatten)]
    pub fields: Record,
}

impl UserProfile {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            fields: Record::new(),
        }
    }

    pub fn with_field(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn from_record(record: Record) -> Result<Self> {
        Ok(serde_json::from_value(serde_json::Value::Object(record))?)
    }

    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }
}
