use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

text_enum! {
    pub enum BackupStatus {
        Completed => "completed",
        Failed => "failed",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub id: Uuid,
    pub file_name: String,
    pub size_bytes: i64,
    pub status: BackupStatus,
    pub error: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Backup {
    /// File name used for a snapshot taken at `at`.
    pub fn file_name_for(at: DateTime<Utc>) -> String {
        format!("propdesk-{}.sqlite3", at.format("%Y%m%dT%H%M%S%.3fZ"))
    }
}
