use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Pagination;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub organization_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    /// Dotted `resource.verb` name, e.g. `lease.create`.
    pub action: String,
    pub subject_type: String,
    pub subject_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub organization_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub subject_type: String,
    pub subject_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub ip: Option<String>,
}

impl NewAuditLog {
    pub fn new(action: &str, subject_type: &str) -> Self {
        Self {
            organization_id: None,
            actor_id: None,
            action: action.to_string(),
            subject_type: subject_type.to_string(),
            subject_id: None,
            metadata: serde_json::Value::Null,
            ip: None,
        }
    }

    pub fn organization(mut self, id: Uuid) -> Self {
        self.organization_id = Some(id);
        self
    }

    pub fn actor(mut self, id: Uuid) -> Self {
        self.actor_id = Some(id);
        self
    }

    pub fn subject(mut self, id: Uuid) -> Self {
        self.subject_id = Some(id);
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn ip(mut self, ip: Option<String>) -> Self {
        self.ip = ip;
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    #[serde(skip)]
    pub organization_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    /// Matches actions starting with this prefix, so `lease` finds every lease action.
    pub action: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditFilter {
    pub fn page(&self) -> Pagination {
        Pagination {
            limit: self.limit,
            offset: self.offset,
        }
    }
}
