//! Organization members: listing, role and permission changes, removal.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use uuid::Uuid;

use propdesk_core::{Page, Role, TeamMember, TeamMemberView, UpdateMember};

use super::record;
use crate::auth::OrgContext;
use crate::{ApiError, ApiResult, AppState};

/// Admins manage members and other admins; owners are managed only by
/// owners.
fn check_can_manage(ctx: &OrgContext, target: &TeamMember, new_role: Option<Role>) -> ApiResult<()> {
    if ctx.access.is_owner() {
        return Ok(());
    }
    if target.role == Role::Owner {
        return Err(ApiError::Forbidden("only an owner can change an owner".into()));
    }
    if new_role == Some(Role::Owner) {
        return Err(ApiError::Forbidden("only an owner can grant ownership".into()));
    }
    Ok(())
}

pub async fn list(
    State(state): State<AppState>,
    ctx: OrgContext,
) -> ApiResult<Json<Vec<TeamMemberView>>> {
    ctx.require(Page::Team)?;
    Ok(Json(state.store.list_members(ctx.id()).await?))
}

/// Applies a role change, a permission replacement and extra grants as a
/// single write.
pub async fn update(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path((_org, member_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<UpdateMember>,
) -> ApiResult<Json<TeamMember>> {
    ctx.require_manager(Page::Team)?;

    let member = state.store.get_member(ctx.id(), member_id).await?;
    check_can_manage(&ctx, &member, input.role)?;

    let role = input.role.filter(|r| *r != member.role);
    let permissions = match (&input.permissions, &input.grant) {
        (None, None) => None,
        (replace, grant) => {
            let base = replace.clone().unwrap_or_else(|| member.permissions.clone());
            Some(match grant {
                Some(grant) => base.merge(grant),
                None => base,
            })
        }
    };
    if role.is_none() && permissions.is_none() {
        return Ok(Json(member));
    }

    let updated = state
        .store
        .update_member(ctx.id(), member_id, role, permissions.as_ref())
        .await?;

    if let Some(role) = role {
        record(
            &state,
            ctx.audit("team.update_role", "team_member")
                .subject(member_id)
                .metadata(json!({ "from": member.role, "to": role })),
        )
        .await;
    }
    if permissions.is_some() {
        record(
            &state,
            ctx.audit("team.update_permissions", "team_member")
                .subject(member_id)
                .metadata(json!({ "permissions": updated.permissions })),
        )
        .await;
    }

    Ok(Json(updated))
}

pub async fn remove(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path((_org, member_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    ctx.require_manager(Page::Team)?;

    let member = state.store.get_member(ctx.id(), member_id).await?;
    check_can_manage(&ctx, &member, None)?;
    state.store.remove_member(ctx.id(), member_id).await?;

    record(
        &state,
        ctx.audit("team.remove", "team_member")
            .subject(member_id)
            .metadata(json!({ "user_id": member.user_id, "role": member.role })),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}
