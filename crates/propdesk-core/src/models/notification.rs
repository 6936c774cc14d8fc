use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::{validate_optional_text, validate_text, Validate, ValidationError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub organization_id: Option<Uuid>,
    pub user_id: Uuid,
    pub title: String,
    pub body: String,
    pub url: Option<String>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendNotification {
    pub title: String,
    pub body: String,
    pub url: Option<String>,
    /// Recipients; every team member when absent.
    pub user_ids: Option<Vec<Uuid>>,
}

impl Validate for SendNotification {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_text("title", &self.title, 1, 140)?;
        validate_text("body", &self.body, 1, 2000)?;
        validate_optional_text("url", self.url.as_deref(), 2000)
    }
}

text_enum! {
    pub enum DevicePlatform {
        Ios => "ios",
        Android => "android",
        Web => "web",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushDevice {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub platform: DevicePlatform,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterDevice {
    pub token: String,
    pub platform: DevicePlatform,
}

impl Validate for RegisterDevice {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_text("token", &self.token, 8, 512)
    }
}
