//! Team invitations: issuing, resending and revoking them inside an
//! organization, and the public accept flow.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use propdesk_core::validation::{normalize_email, validate_password, validate_text};
use propdesk_core::{
    Invitation, InvitationStatus, NewAuditLog, NewInvitation, NewUser, Page, PropdeskError, Role,
    TeamMember, User, Validate,
};
use propdesk_integrations::email::invitation_email;
use propdesk_store::InvitationAccount;

use super::record;
use crate::auth::{hash_password, random_token, MaybeUser, OrgContext};
use crate::{ApiError, ApiResult, AppState};

#[derive(Serialize)]
pub struct InvitationView {
    #[serde(flatten)]
    pub invitation: Invitation,
    pub status: InvitationStatus,
}

impl From<Invitation> for InvitationView {
    fn from(invitation: Invitation) -> Self {
        Self {
            status: invitation.status(Utc::now()),
            invitation,
        }
    }
}

fn expiry(state: &AppState) -> DateTime<Utc> {
    Utc::now() + Duration::hours(state.settings.auth.invitation_ttl_hours)
}

async fn send_invitation_email(state: &AppState, ctx: &OrgContext, invitation: &Invitation) {
    let link = state.app_link(&format!("invitations/{}", invitation.token));
    let message = invitation_email(
        &invitation.email,
        &ctx.organization.name,
        &ctx.user.full_name,
        &link,
    );
    if let Err(e) = state.mailer.send(message).await {
        warn!(invitation_id = %invitation.id, error = %e, "invitation email failed");
    }
}

pub async fn list(
    State(state): State<AppState>,
    ctx: OrgContext,
) -> ApiResult<Json<Vec<InvitationView>>> {
    ctx.require_manager(Page::Team)?;
    let invitations = state.store.list_invitations(ctx.id()).await?;
    Ok(Json(invitations.into_iter().map(InvitationView::from).collect()))
}

pub async fn create(
    State(state): State<AppState>,
    ctx: OrgContext,
    Json(input): Json<NewInvitation>,
) -> ApiResult<(StatusCode, Json<InvitationView>)> {
    ctx.require_manager(Page::Team)?;
    input.validate()?;

    let invitation = state
        .store
        .create_invitation(ctx.id(), Some(ctx.user.id), &input, &random_token(), expiry(&state))
        .await?;
    send_invitation_email(&state, &ctx, &invitation).await;

    record(
        &state,
        ctx.audit("invitation.create", "invitation")
            .subject(invitation.id)
            .metadata(json!({ "email": invitation.email, "role": invitation.role })),
    )
    .await;
    Ok((StatusCode::CREATED, Json(invitation.into())))
}

pub async fn revoke(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path((_org, id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<InvitationView>> {
    ctx.require_manager(Page::Team)?;
    let invitation = state.store.revoke_invitation(ctx.id(), id).await?;
    record(&state, ctx.audit("invitation.revoke", "invitation").subject(id)).await;
    Ok(Json(invitation.into()))
}

/// Issues a fresh token and expiry and sends the email again.
pub async fn resend(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path((_org, id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<InvitationView>> {
    ctx.require_manager(Page::Team)?;
    let invitation = state
        .store
        .refresh_invitation(ctx.id(), id, &random_token(), expiry(&state))
        .await?;
    send_invitation_email(&state, &ctx, &invitation).await;

    record(&state, ctx.audit("invitation.resend", "invitation").subject(id)).await;
    Ok(Json(invitation.into()))
}

/// What an invitee sees before accepting.
#[derive(Serialize)]
pub struct InvitationPreview {
    pub organization_name: String,
    pub email: String,
    pub role: Role,
    pub status: InvitationStatus,
    pub expires_at: DateTime<Utc>,
    pub has_account: bool,
}

pub async fn preview(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<InvitationPreview>> {
    let invitation = state.store.get_invitation_by_token(&token).await?;
    let organization = state
        .store
        .get_organization(invitation.organization_id)
        .await?;
    let has_account = state
        .store
        .get_user_by_email(&invitation.email)
        .await?
        .is_some();

    Ok(Json(InvitationPreview {
        organization_name: organization.name,
        status: invitation.status(Utc::now()),
        email: invitation.email,
        role: invitation.role,
        expires_at: invitation.expires_at,
        has_account,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AcceptInvitation {
    pub full_name: Option<String>,
    pub password: Option<String>,
}

#[derive(Serialize)]
pub struct AcceptedInvitation {
    pub token: String,
    pub user: User,
    pub member: TeamMember,
}

/// Signed-in callers must hold the invited email. Anonymous callers create
/// their account here.
pub async fn accept(
    State(state): State<AppState>,
    caller: MaybeUser,
    Path(token): Path<String>,
    Json(input): Json<AcceptInvitation>,
) -> ApiResult<Json<AcceptedInvitation>> {
    let invitation = state.store.get_invitation_by_token(&token).await?;
    match invitation.status(Utc::now()) {
        InvitationStatus::Pending => {}
        status => {
            return Err(ApiError::Gone(format!("invitation is {}", status)));
        }
    }

    let account = match &caller.user {
        Some(user) => {
            if normalize_email(&user.email) != normalize_email(&invitation.email) {
                return Err(ApiError::Forbidden(
                    "this invitation was sent to a different email address".into(),
                ));
            }
            InvitationAccount::Existing(user.id)
        }
        None => {
            if state
                .store
                .get_user_by_email(&invitation.email)
                .await?
                .is_some()
            {
                return Err(PropdeskError::Conflict(
                    "an account already exists for this email; sign in to accept".into(),
                )
                .into());
            }

            let full_name = input.full_name.as_deref().unwrap_or_default();
            let password = input.password.as_deref().unwrap_or_default();
            validate_text("full_name", full_name, 1, 120)?;
            validate_password(password)?;

            InvitationAccount::New(NewUser {
                email: invitation.email.clone(),
                full_name: full_name.trim().to_string(),
                password_hash: hash_password(password)?,
                is_admin: false,
            })
        }
    };

    let (user, member) = state.store.accept_invitation(&invitation, account).await?;

    record(
        &state,
        NewAuditLog::new("invitation.accept", "invitation")
            .organization(invitation.organization_id)
            .actor(user.id)
            .subject(invitation.id)
            .ip(caller.ip.clone())
            .metadata(json!({ "member_id": member.id, "role": member.role })),
    )
    .await;

    let token = state.tokens.issue(user.id)?;
    Ok(Json(AcceptedInvitation { token, user, member }))
}
