use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::{validate_email, Validate, ValidationError};
use crate::{Permissions, Role};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub permissions: Permissions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A member joined with the account it belongs to, as listed on the team page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMemberView {
    #[serde(flatten)]
    pub member: TeamMember,
    pub email: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateMember {
    pub role: Option<Role>,
    pub permissions: Option<Permissions>,
    /// Extra grants merged into the current permissions rather than replacing them.
    pub grant: Option<Permissions>,
}

text_enum! {
    pub enum InvitationStatus {
        Pending => "pending",
        Accepted => "accepted",
        Revoked => "revoked",
        Expired => "expired",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub role: Role,
    pub permissions: Permissions,
    #[serde(skip_serializing, default)]
    pub token: String,
    pub invited_by: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Invitation {
    pub fn status(&self, now: DateTime<Utc>) -> InvitationStatus {
        if self.accepted_at.is_some() {
            InvitationStatus::Accepted
        } else if self.revoked_at.is_some() {
            InvitationStatus::Revoked
        } else if self.expires_at <= now {
            InvitationStatus::Expired
        } else {
            InvitationStatus::Pending
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewInvitation {
    pub email: String,
    #[serde(default = "NewInvitation::default_role")]
    pub role: Role,
    #[serde(default)]
    pub permissions: Permissions,
}

impl NewInvitation {
    fn default_role() -> Role {
        Role::Member
    }
}

impl Validate for NewInvitation {
    fn validate(&self) -> Result<(), ValidationError> {
        validate_email(&self.email)?;
        if self.role == Role::Owner {
            return Err(ValidationError::InvalidFormat {
                field: "role".to_string(),
                reason: "owners cannot be invited".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn invitation_status_precedence() {
        let now = Utc::now();
        let mut invitation = Invitation {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            email: "new@example.com".into(),
            role: Role::Member,
            permissions: Permissions::default(),
            token: "t".into(),
            invited_by: None,
            expires_at: now + Duration::hours(1),
            accepted_at: None,
            revoked_at: None,
            created_at: now,
        };
        assert_eq!(invitation.status(now), InvitationStatus::Pending);
        assert_eq!(
            invitation.status(now + Duration::hours(2)),
            InvitationStatus::Expired
        );
        invitation.revoked_at = Some(now);
        assert_eq!(invitation.status(now), InvitationStatus::Revoked);
        invitation.accepted_at = Some(now);
        assert_eq!(invitation.status(now), InvitationStatus::Accepted);
    }

    #[test]
    fn owners_cannot_be_invited() {
        let invite = NewInvitation {
            email: "x@example.com".into(),
            role: Role::Owner,
            permissions: Permissions::default(),
        };
        assert!(invite.validate().is_err());
    }
}
