//! Team members and the invitations that create them.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, SqliteConnection};
use tracing::info;
use uuid::Uuid;

use propdesk_core::validation::normalize_email;
use propdesk_core::{
    Invitation, NewInvitation, NewUser, Permissions, PropdeskError, Result, Role, TeamMember,
    TeamMemberView, User,
};

use crate::sqlite::{db_err, parse_col};
use crate::users::insert_user;
use crate::SqliteStore;

/// Who accepts an invitation.
#[derive(Debug, Clone)]
pub enum InvitationAccount {
    /// A signed-in user whose email matches the invitation.
    Existing(Uuid),
    /// An anonymous caller; the account is created as part of acceptance.
    New(NewUser),
}

#[derive(FromRow)]
struct MemberRow {
    id: Uuid,
    organization_id: Uuid,
    user_id: Uuid,
    role: String,
    permissions: Json<Permissions>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MemberRow> for TeamMember {
    type Error = PropdeskError;

    fn try_from(row: MemberRow) -> Result<Self> {
        Ok(TeamMember {
            id: row.id,
            organization_id: row.organization_id,
            user_id: row.user_id,
            role: parse_col(&row.role)?,
            permissions: row.permissions.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct MemberViewRow {
    #[sqlx(flatten)]
    member: MemberRow,
    email: String,
    full_name: String,
}

#[derive(FromRow)]
struct InvitationRow {
    id: Uuid,
    organization_id: Uuid,
    email: String,
    role: String,
    permissions: Json<Permissions>,
    token: String,
    invited_by: Option<Uuid>,
    expires_at: DateTime<Utc>,
    accepted_at: Option<DateTime<Utc>>,
    revoked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<InvitationRow> for Invitation {
    type Error = PropdeskError;

    fn try_from(row: InvitationRow) -> Result<Self> {
        Ok(Invitation {
            id: row.id,
            organization_id: row.organization_id,
            email: row.email,
            role: parse_col(&row.role)?,
            permissions: row.permissions.0,
            token: row.token,
            invited_by: row.invited_by,
            expires_at: row.expires_at,
            accepted_at: row.accepted_at,
            revoked_at: row.revoked_at,
            created_at: row.created_at,
        })
    }
}

const MEMBER_COLUMNS: &str =
    "m.id, m.organization_id, m.user_id, m.role, m.permissions, m.created_at, m.updated_at";

const INVITATION_COLUMNS: &str = "id, organization_id, email, role, permissions, token, invited_by, \
                                  expires_at, accepted_at, revoked_at, created_at";

async fn fetch_membership(
    conn: &mut SqliteConnection,
    organization_id: Uuid,
    user_id: Uuid,
) -> Result<Option<TeamMember>> {
    let row: Option<MemberRow> = sqlx::query_as(&format!(
        "SELECT {} FROM team_members m WHERE m.organization_id = ? AND m.user_id = ?",
        MEMBER_COLUMNS
    ))
    .bind(organization_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await
    .map_err(db_err)?;

    row.map(TeamMember::try_from).transpose()
}

async fn insert_member(
    conn: &mut SqliteConnection,
    organization_id: Uuid,
    user_id: Uuid,
    role: Role,
    permissions: &Permissions,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO team_members (id, organization_id, user_id, role, permissions, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(organization_id)
    .bind(user_id)
    .bind(role.as_str())
    .bind(Json(permissions.clone().normalized()))
    .bind(now)
    .bind(now)
    .execute(conn)
    .await
    .map_err(|e| match db_err(e) {
        PropdeskError::Conflict(_) => {
            PropdeskError::Conflict("user is already a member of this organization".to_string())
        }
        other => other,
    })?;
    Ok(id)
}

/// Marks a still pending invitation as accepted. Accepted, revoked and
/// expired invitations are refused.
async fn accept_pending(conn: &mut SqliteConnection, id: Uuid, now: DateTime<Utc>) -> Result<()> {
    let result = sqlx::query(
        "UPDATE invitations SET accepted_at = ?
         WHERE id = ? AND accepted_at IS NULL AND revoked_at IS NULL AND expires_at > ?",
    )
    .bind(now)
    .bind(id)
    .bind(now)
    .execute(conn)
    .await
    .map_err(db_err)?;

    if result.rows_affected() == 0 {
        return Err(PropdeskError::Conflict(
            "invitation is no longer pending".to_string(),
        ));
    }
    Ok(())
}

fn role_rank(role: Role) -> u8 {
    match role {
        Role::Member => 0,
        Role::Admin => 1,
        Role::Owner => 2,
    }
}

impl SqliteStore {
    pub async fn add_member(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        role: Role,
        permissions: &Permissions,
    ) -> Result<TeamMember> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        let id = insert_member(&mut conn, organization_id, user_id, role, permissions).await?;
        drop(conn);

        info!(organization_id = %organization_id, user_id = %user_id, role = %role, "member added");
        self.get_member(organization_id, id).await
    }

    pub async fn get_member(&self, organization_id: Uuid, member_id: Uuid) -> Result<TeamMember> {
        let row: Option<MemberRow> = sqlx::query_as(&format!(
            "SELECT {} FROM team_members m WHERE m.organization_id = ? AND m.id = ?",
            MEMBER_COLUMNS
        ))
        .bind(organization_id)
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.ok_or_else(|| PropdeskError::not_found("team member", member_id))?
            .try_into()
    }

    /// The membership of `user_id` in the organization, if any.
    pub async fn get_membership(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TeamMember>> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        fetch_membership(&mut conn, organization_id, user_id).await
    }

    pub async fn list_members(&self, organization_id: Uuid) -> Result<Vec<TeamMemberView>> {
        let rows: Vec<MemberViewRow> = sqlx::query_as(&format!(
            "SELECT {}, u.email, u.full_name
             FROM team_members m JOIN users u ON u.id = m.user_id
             WHERE m.organization_id = ?
             ORDER BY m.created_at ASC, m.rowid ASC",
            MEMBER_COLUMNS
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                Ok(TeamMemberView {
                    member: row.member.try_into()?,
                    email: row.email,
                    full_name: row.full_name,
                })
            })
            .collect()
    }

    pub async fn update_member_permissions(
        &self,
        organization_id: Uuid,
        member_id: Uuid,
        permissions: &Permissions,
    ) -> Result<TeamMember> {
        self.update_member(organization_id, member_id, None, Some(permissions))
            .await
    }

    /// Changes a member's role. Demoting the only owner is refused.
    pub async fn update_member_role(
        &self,
        organization_id: Uuid,
        member_id: Uuid,
        role: Role,
    ) -> Result<TeamMember> {
        self.update_member(organization_id, member_id, Some(role), None)
            .await
    }

    /// Applies a role change and a permission change in one transaction, so
    /// either both land or neither does. Demoting the only owner is refused.
    pub async fn update_member(
        &self,
        organization_id: Uuid,
        member_id: Uuid,
        role: Option<Role>,
        permissions: Option<&Permissions>,
    ) -> Result<TeamMember> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let current: Option<String> = sqlx::query_scalar(
            "SELECT role FROM team_members WHERE organization_id = ? AND id = ?",
        )
        .bind(organization_id)
        .bind(member_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        let current: Role = parse_col(
            &current.ok_or_else(|| PropdeskError::not_found("team member", member_id))?,
        )?;
        let now = Utc::now();

        if let Some(role) = role {
            if current == Role::Owner && role != Role::Owner {
                ensure_other_owner(&mut tx, organization_id).await?;
            }
            sqlx::query("UPDATE team_members SET role = ?, updated_at = ? WHERE id = ?")
                .bind(role.as_str())
                .bind(now)
                .bind(member_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        if let Some(permissions) = permissions {
            sqlx::query("UPDATE team_members SET permissions = ?, updated_at = ? WHERE id = ?")
                .bind(Json(permissions.clone().normalized()))
                .bind(now)
                .bind(member_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        self.get_member(organization_id, member_id).await
    }

    /// Removes a member. The only owner cannot be removed.
    pub async fn remove_member(&self, organization_id: Uuid, member_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let role: Option<String> = sqlx::query_scalar(
            "SELECT role FROM team_members WHERE organization_id = ? AND id = ?",
        )
        .bind(organization_id)
        .bind(member_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        let role: Role =
            parse_col(&role.ok_or_else(|| PropdeskError::not_found("team member", member_id))?)?;

        if role == Role::Owner {
            ensure_other_owner(&mut tx, organization_id).await?;
        }

        sqlx::query("DELETE FROM team_members WHERE id = ?")
            .bind(member_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        info!(organization_id = %organization_id, member_id = %member_id, "member removed");
        Ok(())
    }

    /// Stores a new invitation. Only one pending invitation per email and
    /// organization may exist at a time.
    pub async fn create_invitation(
        &self,
        organization_id: Uuid,
        invited_by: Option<Uuid>,
        input: &NewInvitation,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Invitation> {
        let email = normalize_email(&input.email);
        let now = Utc::now();

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let pending: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM invitations
             WHERE organization_id = ? AND email = ?
               AND accepted_at IS NULL AND revoked_at IS NULL AND expires_at > ?)",
        )
        .bind(organization_id)
        .bind(&email)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        if pending {
            return Err(PropdeskError::Conflict(format!(
                "{} already has a pending invitation",
                email
            )));
        }

        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO invitations (id, organization_id, email, role, permissions, token, invited_by, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(organization_id)
        .bind(&email)
        .bind(input.role.as_str())
        .bind(Json(input.permissions.clone().normalized()))
        .bind(token)
        .bind(invited_by)
        .bind(expires_at)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        info!(organization_id = %organization_id, invitation_id = %id, "invitation created");
        self.get_invitation(organization_id, id).await
    }

    pub async fn get_invitation(&self, organization_id: Uuid, id: Uuid) -> Result<Invitation> {
        let row: Option<InvitationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM invitations WHERE organization_id = ? AND id = ?",
            INVITATION_COLUMNS
        ))
        .bind(organization_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.ok_or_else(|| PropdeskError::not_found("invitation", id))?
            .try_into()
    }

    pub async fn get_invitation_by_token(&self, token: &str) -> Result<Invitation> {
        let row: Option<InvitationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM invitations WHERE token = ?",
            INVITATION_COLUMNS
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.ok_or_else(|| PropdeskError::NotFound("invitation not found".to_string()))?
            .try_into()
    }

    pub async fn list_invitations(&self, organization_id: Uuid) -> Result<Vec<Invitation>> {
        let rows: Vec<InvitationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM invitations WHERE organization_id = ? ORDER BY created_at DESC, rowid DESC",
            INVITATION_COLUMNS
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(Invitation::try_from).collect()
    }

    pub async fn mark_invitation_accepted(&self, id: Uuid) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        accept_pending(&mut conn, id, Utc::now()).await
    }

    pub async fn revoke_invitation(&self, organization_id: Uuid, id: Uuid) -> Result<Invitation> {
        let result = sqlx::query(
            "UPDATE invitations SET revoked_at = ?
             WHERE organization_id = ? AND id = ? AND accepted_at IS NULL AND revoked_at IS NULL",
        )
        .bind(Utc::now())
        .bind(organization_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            // Distinguish a missing invitation from one that is already closed.
            self.get_invitation(organization_id, id).await?;
            return Err(PropdeskError::Conflict(
                "invitation was already accepted or revoked".to_string(),
            ));
        }
        self.get_invitation(organization_id, id).await
    }

    /// Issues a new token and expiry for an invitation that has not been
    /// accepted or revoked, invalidating the old link.
    pub async fn refresh_invitation(
        &self,
        organization_id: Uuid,
        id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Invitation> {
        let result = sqlx::query(
            "UPDATE invitations SET token = ?, expires_at = ?
             WHERE organization_id = ? AND id = ? AND accepted_at IS NULL AND revoked_at IS NULL",
        )
        .bind(token)
        .bind(expires_at)
        .bind(organization_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            self.get_invitation(organization_id, id).await?;
            return Err(PropdeskError::Conflict(
                "invitation was already accepted or revoked".to_string(),
            ));
        }
        self.get_invitation(organization_id, id).await
    }

    /// Accepts `invitation` in one transaction: marks it accepted, creates
    /// the account when needed, then either creates the membership or merges
    /// the invited permissions into the existing one. An existing member
    /// keeps the higher of the two roles.
    pub async fn accept_invitation(
        &self,
        invitation: &Invitation,
        account: InvitationAccount,
    ) -> Result<(User, TeamMember)> {
        let organization_id = invitation.organization_id;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        accept_pending(&mut tx, invitation.id, Utc::now()).await?;

        let user_id = match account {
            InvitationAccount::Existing(user_id) => user_id,
            InvitationAccount::New(new_user) => insert_user(&mut tx, &new_user).await?,
        };

        let member_id = match fetch_membership(&mut tx, organization_id, user_id).await? {
            Some(existing) => {
                let permissions = existing.permissions.merge(&invitation.permissions);
                let role = if role_rank(invitation.role) > role_rank(existing.role) {
                    invitation.role
                } else {
                    existing.role
                };
                sqlx::query(
                    "UPDATE team_members SET role = ?, permissions = ?, updated_at = ? WHERE id = ?",
                )
                .bind(role.as_str())
                .bind(Json(permissions))
                .bind(Utc::now())
                .bind(existing.id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
                existing.id
            }
            None => {
                insert_member(
                    &mut tx,
                    organization_id,
                    user_id,
                    invitation.role,
                    &invitation.permissions,
                )
                .await?
            }
        };

        tx.commit().await.map_err(db_err)?;
        info!(
            organization_id = %organization_id,
            invitation_id = %invitation.id,
            user_id = %user_id,
            "invitation accepted"
        );

        let user = self.get_user(user_id).await?;
        let member = self.get_member(organization_id, member_id).await?;
        Ok((user, member))
    }
}

async fn ensure_other_owner(conn: &mut SqliteConnection, organization_id: Uuid) -> Result<()> {
    let owners: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM team_members WHERE organization_id = ? AND role = ?",
    )
    .bind(organization_id)
    .bind(Role::Owner.as_str())
    .fetch_one(conn)
    .await
    .map_err(db_err)?;

    if owners <= 1 {
        return Err(PropdeskError::Conflict(
            "an organization must keep at least one owner".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::tests::seed_user;
    use chrono::Duration;
    use propdesk_core::{AccessMode, NewOrganization, Page};
    use std::collections::BTreeSet;

    async fn setup() -> (SqliteStore, Uuid, User) {
        let store = SqliteStore::in_memory().await.unwrap();
        let owner = seed_user(&store, "owner@example.com").await;
        let org = store
            .create_organization(owner.id, &NewOrganization { name: "Acme".into() })
            .await
            .unwrap();
        (store, org.id, owner)
    }

    fn invite(email: &str, permissions: Permissions) -> NewInvitation {
        NewInvitation {
            email: email.to_string(),
            role: Role::Member,
            permissions,
        }
    }

    #[tokio::test]
    async fn last_owner_is_protected() {
        let (store, org, owner) = setup().await;
        let owner_member = store.get_membership(org, owner.id).await.unwrap().unwrap();

        assert!(matches!(
            store.remove_member(org, owner_member.id).await,
            Err(PropdeskError::Conflict(_))
        ));
        assert!(matches!(
            store.update_member_role(org, owner_member.id, Role::Admin).await,
            Err(PropdeskError::Conflict(_))
        ));

        let second = seed_user(&store, "second@example.com").await;
        let second_member = store
            .add_member(org, second.id, Role::Owner, &Permissions::default())
            .await
            .unwrap();
        let demoted = store
            .update_member_role(org, owner_member.id, Role::Admin)
            .await
            .unwrap();
        assert_eq!(demoted.role, Role::Admin);
        assert!(matches!(
            store.remove_member(org, second_member.id).await,
            Err(PropdeskError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn members_list_with_account_details() {
        let (store, org, owner) = setup().await;
        let member = seed_user(&store, "member@example.com").await;
        store
            .add_member(org, member.id, Role::Member, &Permissions::default())
            .await
            .unwrap();
        assert!(matches!(
            store
                .add_member(org, member.id, Role::Member, &Permissions::default())
                .await,
            Err(PropdeskError::Conflict(_))
        ));

        let members = store.list_members(org).await.unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].member.user_id, owner.id);
        assert_eq!(members[1].email, "member@example.com");
        assert_eq!(members[1].member.permissions, Permissions::default());
    }

    #[tokio::test]
    async fn permissions_are_normalized_on_write() {
        let (store, org, _) = setup().await;
        let user = seed_user(&store, "member@example.com").await;
        let member = store
            .add_member(org, user.id, Role::Member, &Permissions::default())
            .await
            .unwrap();

        let perms = Permissions {
            pages: BTreeSet::from([Page::Leases]),
            leases_access_mode: AccessMode::All,
            allowed_lease_ids: BTreeSet::from([Uuid::new_v4()]),
            ..Permissions::default()
        };
        let updated = store
            .update_member_permissions(org, member.id, &perms)
            .await
            .unwrap();
        assert!(updated.permissions.pages.contains(&Page::Dashboard));
        assert!(updated.permissions.allowed_lease_ids.is_empty());
    }

    #[tokio::test]
    async fn role_and_permissions_change_together() {
        let (store, org, owner) = setup().await;
        let owner_member = store.get_membership(org, owner.id).await.unwrap().unwrap();
        let leases_only = Permissions {
            pages: BTreeSet::from([Page::Leases]),
            leases_access_mode: AccessMode::All,
            ..Permissions::default()
        };

        // A refused demotion leaves the permissions untouched too.
        assert!(matches!(
            store
                .update_member(org, owner_member.id, Some(Role::Member), Some(&leases_only))
                .await,
            Err(PropdeskError::Conflict(_))
        ));
        let unchanged = store.get_member(org, owner_member.id).await.unwrap();
        assert_eq!(unchanged.role, Role::Owner);
        assert_eq!(unchanged.permissions, owner_member.permissions);

        let user = seed_user(&store, "member@example.com").await;
        let member = store
            .add_member(org, user.id, Role::Member, &Permissions::default())
            .await
            .unwrap();
        let updated = store
            .update_member(org, member.id, Some(Role::Admin), Some(&leases_only))
            .await
            .unwrap();
        assert_eq!(updated.role, Role::Admin);
        assert_eq!(updated.permissions.leases_access_mode, AccessMode::All);

        assert!(matches!(
            store.update_member(org, Uuid::new_v4(), Some(Role::Admin), None).await,
            Err(PropdeskError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn one_pending_invitation_per_email() {
        let (store, org, owner) = setup().await;
        let expires = Utc::now() + Duration::hours(1);
        let first = store
            .create_invitation(org, Some(owner.id), &invite("New@Example.com", Permissions::default()), "tok-1", expires)
            .await
            .unwrap();
        assert_eq!(first.email, "new@example.com");

        let dup = store
            .create_invitation(org, Some(owner.id), &invite("new@example.com", Permissions::default()), "tok-2", expires)
            .await;
        assert!(matches!(dup, Err(PropdeskError::Conflict(_))));

        store.revoke_invitation(org, first.id).await.unwrap();
        assert!(matches!(
            store.revoke_invitation(org, first.id).await,
            Err(PropdeskError::Conflict(_))
        ));
        store
            .create_invitation(org, Some(owner.id), &invite("new@example.com", Permissions::default()), "tok-3", expires)
            .await
            .unwrap();
        assert_eq!(store.list_invitations(org).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn accepting_creates_account_and_membership() {
        let (store, org, owner) = setup().await;
        let invitation = store
            .create_invitation(
                org,
                Some(owner.id),
                &invite("new@example.com", Permissions::default()),
                "tok",
                Utc::now() + Duration::hours(1),
            )
            .await
            .unwrap();

        let (user, member) = store
            .accept_invitation(
                &invitation,
                InvitationAccount::New(NewUser {
                    email: "new@example.com".into(),
                    full_name: "New Person".into(),
                    password_hash: "$argon2id$x".into(),
                    is_admin: false,
                }),
            )
            .await
            .unwrap();
        assert_eq!(user.email, "new@example.com");
        assert_eq!(member.role, Role::Member);

        let again = store
            .accept_invitation(&invitation, InvitationAccount::Existing(user.id))
            .await;
        assert!(matches!(again, Err(PropdeskError::Conflict(_))));
        let stored = store.get_invitation_by_token("tok").await.unwrap();
        assert!(stored.accepted_at.is_some());
    }

    #[tokio::test]
    async fn accepting_as_existing_member_merges() {
        let (store, org, owner) = setup().await;
        let user = seed_user(&store, "member@example.com").await;
        let first_property = Uuid::new_v4();
        let second_property = Uuid::new_v4();
        store
            .add_member(
                org,
                user.id,
                Role::Member,
                &Permissions {
                    pages: BTreeSet::from([Page::Properties]),
                    properties_access_mode: AccessMode::Selected,
                    allowed_property_ids: BTreeSet::from([first_property]),
                    ..Permissions::default()
                },
            )
            .await
            .unwrap();

        let invitation = store
            .create_invitation(
                org,
                Some(owner.id),
                &invite(
                    "member@example.com",
                    Permissions {
                        pages: BTreeSet::from([Page::Leases]),
                        properties_access_mode: AccessMode::Selected,
                        allowed_property_ids: BTreeSet::from([second_property]),
                        leases_access_mode: AccessMode::All,
                        ..Permissions::default()
                    },
                ),
                "tok",
                Utc::now() + Duration::hours(1),
            )
            .await
            .unwrap();

        let (_, member) = store
            .accept_invitation(&invitation, InvitationAccount::Existing(user.id))
            .await
            .unwrap();
        assert_eq!(
            member.permissions.allowed_property_ids,
            BTreeSet::from([first_property, second_property])
        );
        assert_eq!(member.permissions.leases_access_mode, AccessMode::All);
        assert!(member.permissions.pages.contains(&Page::Properties));
        assert!(member.permissions.pages.contains(&Page::Leases));
        assert_eq!(store.list_members(org).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn expired_and_refreshed_invitations() {
        let (store, org, owner) = setup().await;
        let invitation = store
            .create_invitation(
                org,
                Some(owner.id),
                &invite("late@example.com", Permissions::default()),
                "old-token",
                Utc::now() - Duration::minutes(1),
            )
            .await
            .unwrap();

        let user = seed_user(&store, "late@example.com").await;
        assert!(matches!(
            store
                .accept_invitation(&invitation, InvitationAccount::Existing(user.id))
                .await,
            Err(PropdeskError::Conflict(_))
        ));

        let refreshed = store
            .refresh_invitation(org, invitation.id, "new-token", Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        assert!(store.get_invitation_by_token("old-token").await.is_err());
        store
            .accept_invitation(&refreshed, InvitationAccount::Existing(user.id))
            .await
            .unwrap();
    }
}
