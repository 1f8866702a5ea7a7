use serde::{Deserialize, Serialize};

/// A database row as exchanged with the hosted REST and realtime APIs.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Kind of row mutation reported by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A single row-change notification.
///
/// `new` is absent for deletes and `old` is only populated when the table
/// publishes old rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    pub kind: ChangeKind,
    pub schema: String,
    pub table: String,
    #[serde(default)]
    pub new: Option<Record>,
    #[serde(default)]
    pub old: Option<Record>,
}

impl RowChange {
    pub fn new_row(&self) -> Option<&Record> {
        self.new.as_ref().filter(|row| !row.is_empty())
    }
}
