use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::{
    validate_currency, validate_date_range, validate_email, validate_non_negative,
    validate_optional_text, validate_text, Validate, ValidationError,
};
use crate::{Pagination, PropdeskError, Result};

text_enum! {
    pub enum LeaseStatus {
        Draft => "draft",
        Active => "active",
        Ended => "ended",
        Terminated => "terminated",
    }
}

impl LeaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LeaseStatus::Ended | LeaseStatus::Terminated)
    }

    pub fn can_transition_to(&self, next: LeaseStatus) -> bool {
        use LeaseStatus::*;
        match (self, next) {
            (a, b) if *a == b => true,
            (Draft, Active | Terminated) => true,
            (Active, Ended | Terminated) => true,
            _ => false,
        }
    }

    pub fn transition(&self, next: LeaseStatus) -> Result<LeaseStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PropdeskError::InvalidOperation(format!(
                "lease cannot move from {} to {}",
                self, next
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub entity_id: Uuid,
    pub tenant_name: String,
    pub tenant_email: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub rent_cents: i64,
    pub deposit_cents: i64,
    pub currency: String,
    pub status: LeaseStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewLease {
    pub entity_id: Uuid,
    pub tenant_name: String,
    pub tenant_email: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub rent_cents: i64,
    #[serde(default)]
    pub deposit_cents: i64,
    #[serde(default = "NewLease::default_currency")]
    pub currency: String,
    #[serde(default = "NewLease::default_status")]
    pub status: LeaseStatus,
    pub notes: Option<String>,
}

impl NewLease {
    fn default_currency() -> String {
        "USD".to_string()
    }

    fn default_status() -> LeaseStatus {
        LeaseStatus::Draft
    }
}

impl Validate for NewLease {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        validate_text("tenant_name", &self.tenant_name, 1, 200)?;
        if let Some(email) = &self.tenant_email {
            validate_email(email)?;
        }
        validate_date_range(self.start_date, self.end_date)?;
        validate_non_negative("rent_cents", self.rent_cents)?;
        validate_non_negative("deposit_cents", self.deposit_cents)?;
        validate_currency(&self.currency)?;
        validate_optional_text("notes", self.notes.as_deref(), 5000)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateLease {
    pub entity_id: Option<Uuid>,
    pub tenant_name: Option<String>,
    pub tenant_email: Option<String>,
    pub start_date: Option<NaiveDate>,
    /// `null` clears the end date, making the lease open-ended again.
    #[serde(default, deserialize_with = "crate::models::nullable")]
    pub end_date: Option<Option<NaiveDate>>,
    pub rent_cents: Option<i64>,
    pub deposit_cents: Option<i64>,
    pub currency: Option<String>,
    pub status: Option<LeaseStatus>,
    pub notes: Option<String>,
}

impl UpdateLease {
    /// Applies the update onto `lease`, checking every invariant on the
    /// merged result.
    pub fn apply(&self, lease: &Lease) -> Result<Lease> {
        let mut next = lease.clone();

        if let Some(entity_id) = self.entity_id {
            next.entity_id = entity_id;
        }
        if let Some(name) = &self.tenant_name {
            validate_text("tenant_name", name, 1, 200)?;
            next.tenant_name = name.trim().to_string();
        }
        if let Some(email) = &self.tenant_email {
            next.tenant_email = crate::blank_to_none(Some(email.clone()));
            if let Some(e) = &next.tenant_email {
                validate_email(e)?;
            }
        }
        if let Some(start) = self.start_date {
            next.start_date = start;
        }
        if let Some(end) = self.end_date {
            next.end_date = end;
        }
        if let Some(rent) = self.rent_cents {
            validate_non_negative("rent_cents", rent)?;
            next.rent_cents = rent;
        }
        if let Some(deposit) = self.deposit_cents {
            validate_non_negative("deposit_cents", deposit)?;
            next.deposit_cents = deposit;
        }
        if let Some(currency) = &self.currency {
            validate_currency(currency)?;
            next.currency = currency.clone();
        }
        if let Some(status) = self.status {
            next.status = lease.status.transition(status)?;
        }
        if let Some(notes) = &self.notes {
            validate_optional_text("notes", Some(notes), 5000)?;
            next.notes = crate::blank_to_none(Some(notes.clone()));
        }

        validate_date_range(next.start_date, next.end_date)?;
        Ok(next)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeaseFilter {
    pub status: Option<LeaseStatus>,
    pub entity_id: Option<Uuid>,
    /// Case-insensitive substring match on tenant name and email.
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl LeaseFilter {
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

    fn lease() -> Lease {
        Lease {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            entity_id: Uuid::new_v4(),
            tenant_name: "Dana".into(),
            tenant_email: None,
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end_date: None,
            rent_cents: 120_000,
            deposit_cents: 0,
            currency: "USD".into(),
            status: LeaseStatus::Draft,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn status_transitions() {
        assert!(LeaseStatus::Draft.can_transition_to(LeaseStatus::Active));
        assert!(LeaseStatus::Active.can_transition_to(LeaseStatus::Ended));
        assert!(!LeaseStatus::Ended.can_transition_to(LeaseStatus::Active));
        assert!(!LeaseStatus::Draft.can_transition_to(LeaseStatus::Ended));
        assert!(LeaseStatus::Terminated.is_terminal());
    }

    #[test]
    fn update_checks_merged_dates() {
        let current = lease();
        let update = UpdateLease {
            end_date: Some(NaiveDate::from_ymd_opt(2025, 6, 1)),
            ..Default::default()
        };
        assert!(update.apply(&current).is_err());

        let update = UpdateLease {
            end_date: Some(NaiveDate::from_ymd_opt(2026, 12, 31)),
            status: Some(LeaseStatus::Active),
            tenant_email: Some("dana@example.com".into()),
            ..Default::default()
        };
        let next = update.apply(&current).unwrap();
        assert_eq!(next.status, LeaseStatus::Active);
        assert_eq!(next.tenant_email.as_deref(), Some("dana@example.com"));
    }

    #[test]
    fn null_end_date_clears_it() {
        let mut current = lease();
        current.end_date = NaiveDate::from_ymd_opt(2026, 12, 31);

        let keep: UpdateLease = serde_json::from_value(serde_json::json!({ "rent_cents": 1 })).unwrap();
        assert_eq!(keep.end_date, None);
        assert_eq!(keep.apply(&current).unwrap().end_date, current.end_date);

        let clear: UpdateLease = serde_json::from_value(serde_json::json!({ "end_date": null })).unwrap();
        assert_eq!(clear.end_date, Some(None));
        assert_eq!(clear.apply(&current).unwrap().end_date, None);

        let set: UpdateLease =
            serde_json::from_value(serde_json::json!({ "end_date": "2027-06-30" })).unwrap();
        assert_eq!(
            set.apply(&current).unwrap().end_date,
            NaiveDate::from_ymd_opt(2027, 6, 30)
        );
    }

    #[test]
    fn update_rejects_bad_transition_and_negative_rent() {
        let mut current = lease();
        current.status = LeaseStatus::Ended;
        let update = UpdateLease {
            status: Some(LeaseStatus::Active),
            ..Default::default()
        };
        assert!(matches!(
            update.apply(&current),
            Err(PropdeskError::InvalidOperation(_))
        ));

        let update = UpdateLease {
            rent_cents: Some(-1),
            ..Default::default()
        };
        assert!(update.apply(&lease()).is_err());
    }

    #[test]
    fn new_lease_defaults() {
        let json = serde_json::json!({
            "entity_id": Uuid::new_v4(),
            "tenant_name": "Sam",
            "start_date": "2026-02-01",
            "rent_cents": 90000
        });
        let lease: NewLease = serde_json::from_value(json).unwrap();
        assert_eq!(lease.currency, "USD");
        assert_eq!(lease.status, LeaseStatus::Draft);
        assert!(lease.validate().is_ok());
    }
}
