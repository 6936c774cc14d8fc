use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::{validate_text, Validate, ValidationError};

text_enum! {
    pub enum Plan {
        Free => "free",
        Pro => "pro",
        Enterprise => "enterprise",
    }
}

text_enum! {
    pub enum SubscriptionStatus {
        Inactive => "none",
        Trialing => "trialing",
        Active => "active",
        PastDue => "past_due",
        Canceled => "canceled",
    }
}

impl SubscriptionStatus {
    /// Maps a Stripe subscription status onto ours. Statuses we do not track
    /// separately collapse into the closest one.
    pub fn from_stripe(status: &str) -> Self {
        match status {
            "trialing" => SubscriptionStatus::Trialing,
            "active" => SubscriptionStatus::Active,
            "past_due" | "unpaid" | "incomplete" => SubscriptionStatus::PastDue,
            "canceled" | "incomplete_expired" => SubscriptionStatus::Canceled,
            _ => SubscriptionStatus::Inactive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub owner_id: Uuid,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub plan: Plan,
    pub subscription_status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrganization {
    pub name: String,
}

impl Validate for NewOrganization {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_text("name", &self.name, 2, 120)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateOrganization {
    pub name: Option<String>,
}

impl Validate for UpdateOrganization {
    fn validate(&self) -> Result<(), ValidationError> {
        match &self.name {
            Some(name) => validate_text("name", name, 2, 120),
            None => Ok(()),
        }
    }
}

/// Billing fields written back from Stripe.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingUpdate {
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub plan: Plan,
    pub subscription_status: SubscriptionStatus,
}
