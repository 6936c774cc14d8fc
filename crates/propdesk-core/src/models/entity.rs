use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::{validate_optional_text, validate_text, Validate, ValidationError};
use crate::{Pagination, PropdeskError, Result};

text_enum! {
    /// Leaseable entities form a shallow tree: properties contain units,
    /// and rooms sit in either.
    pub enum EntityKind {
        Property => "property",
        Unit => "unit",
        Room => "room",
    }
}

impl EntityKind {
    /// Checks that an entity of this kind may hang under `parent`.
    pub fn check_parent(&self, parent: Option<EntityKind>) -> Result<()> {
        let ok = match (self, parent) {
            (EntityKind::Property, None) => true,
            (EntityKind::Unit, Some(EntityKind::Property)) => true,
            (EntityKind::Room, Some(EntityKind::Property | EntityKind::Unit)) => true,
            _ => false,
        };

        if ok {
            return Ok(());
        }

        let message = match parent {
            None => format!("a {} needs a parent", self),
            Some(p) => format!("a {} cannot be placed under a {}", self, p),
        };
        Err(PropdeskError::Validation(message))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseableEntity {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub kind: EntityKind,
    pub name: String,
    pub address: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEntity {
    pub kind: EntityKind,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub address: Option<String>,
    pub description: Option<String>,
}

impl Validate for NewEntity {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        validate_text("name", &self.name, 1, 200)?;
        validate_optional_text("address", self.address.as_deref(), 500)?;
        validate_optional_text("description", self.description.as_deref(), 5000)
    }
}

/// Partial update. An empty string clears an optional text field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEntity {
    pub name: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
}

impl Validate for UpdateEntity {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        if let Some(name) = &self.name {
            validate_text("name", name, 1, 200)?;
        }
        validate_optional_text("address", self.address.as_deref(), 500)?;
        validate_optional_text("description", self.description.as_deref(), 5000)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityFilter {
    pub kind: Option<EntityKind>,
    pub parent_id: Option<Uuid>,
    /// Case-insensitive substring match on name and address.
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl EntityFilter {
    pub fn page(&self) -> Pagination {
        Pagination {
            limit: self.limit,
            offset: self.offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_rules() {
        assert!(EntityKind::Property.check_parent(None).is_ok());
        assert!(EntityKind::Property
            .check_parent(Some(EntityKind::Property))
            .is_err());
        assert!(EntityKind::Unit.check_parent(Some(EntityKind::Property)).is_ok());
        assert!(EntityKind::Unit.check_parent(Some(EntityKind::Unit)).is_err());
        assert!(EntityKind::Unit.check_parent(None).is_err());
        assert!(EntityKind::Room.check_parent(Some(EntityKind::Unit)).is_ok());
        assert!(EntityKind::Room.check_parent(Some(EntityKind::Property)).is_ok());
        assert!(EntityKind::Room.check_parent(Some(EntityKind::Room)).is_err());
    }
}
