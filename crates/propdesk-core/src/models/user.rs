use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::{validate_email, validate_password, validate_text, Validate, ValidationError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub is_admin: bool,
    pub two_factor_enabled: bool,
    #[serde(skip_serializing, default)]
    pub two_factor_secret: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for account creation. The password is hashed before it reaches the
/// store; `password_hash` is what gets persisted.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub full_name: String,
    pub password: String,
    /// Optional organization created together with the account.
    pub organization_name: Option<String>,
}

impl Validate for SignupRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_email(&self.email)?;
        validate_text("full_name", &self.full_name, 1, 120)?;
        validate_password(&self.password)?;
        if let Some(name) = &self.organization_name {
            validate_text("organization_name", name, 2, 120)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfile {
    pub full_name: Option<String>,
}

impl Validate for UpdateProfile {
    fn validate(&self) -> Result<(), ValidationError> {
        match &self.full_name {
            Some(name) => validate_text("full_name", name, 1, 120),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PasswordReset {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PasswordReset {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn secrets_are_not_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            email: "a@example.com".into(),
            full_name: "A".into(),
            password_hash: "$argon2id$secret".into(),
            is_admin: false,
            two_factor_enabled: true,
            two_factor_secret: Some("BASE32SECRET".into()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2"));
        assert!(!json.contains("BASE32SECRET"));
        assert!(json.contains("\"two_factor_enabled\":true"));
    }

    #[test]
    fn reset_usability() {
        let now = Utc::now();
        let mut reset = PasswordReset {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token_hash: "h".into(),
            expires_at: now + Duration::minutes(5),
            used_at: None,
            created_at: now,
        };
        assert!(reset.is_usable(now));
        assert!(!reset.is_usable(now + Duration::minutes(6)));
        reset.used_at = Some(now);
        assert!(!reset.is_usable(now));
    }
}
