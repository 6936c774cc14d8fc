use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use serde_json::json;

use propdesk_core::{
    NewAuditLog, NewOrganization, Organization, Page, Permissions, Role, UpdateOrganization,
    Validate,
};

use super::record;
use crate::auth::{AdminUser, CurrentUser, OrgContext};
use crate::{ApiError, ApiResult, AppState};

pub async fn list_mine(
    State(state): State<AppState>,
    current: CurrentUser,
) -> ApiResult<Json<Vec<Organization>>> {
    Ok(Json(
        state
            .store
            .list_organizations_for_user(current.user.id)
            .await?,
    ))
}

pub async fn create(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(input): Json<NewOrganization>,
) -> ApiResult<(StatusCode, Json<Organization>)> {
    input.validate()?;
    let org = state
        .store
        .create_organization(current.user.id, &input)
        .await?;

    record(
        &state,
        current
            .audit("organization.create", "organization")
            .organization(org.id)
            .subject(org.id),
    )
    .await;
    Ok((StatusCode::CREATED, Json(org)))
}

/// The organization together with what the caller may do in it.
#[derive(Serialize)]
pub struct OrganizationView {
    pub organization: Organization,
    pub role: Option<Role>,
    pub is_platform_admin: bool,
    pub permissions: Permissions,
}

pub async fn get(ctx: OrgContext) -> ApiResult<Json<OrganizationView>> {
    ctx.require(Page::Dashboard)?;
    Ok(Json(OrganizationView {
        permissions: ctx.access.permissions().clone(),
        role: ctx.access.role,
        is_platform_admin: ctx.access.is_platform_admin,
        organization: ctx.organization,
    }))
}

pub async fn update(
    State(state): State<AppState>,
    ctx: OrgContext,
    Json(input): Json<UpdateOrganization>,
) -> ApiResult<Json<Organization>> {
    ctx.require(Page::Settings)?;
    input.validate()?;

    let org = state.store.update_organization(ctx.id(), &input).await?;
    record(
        &state,
        ctx.audit("organization.update", "organization")
            .subject(org.id)
            .metadata(json!({ "name": org.name })),
    )
    .await;
    Ok(Json(org))
}

pub async fn delete(State(state): State<AppState>, ctx: OrgContext) -> ApiResult<StatusCode> {
    if !ctx.access.is_owner() {
        return Err(ApiError::Forbidden(
            "only the owner can delete an organization".into(),
        ));
    }

    state.store.delete_organization(ctx.id()).await?;

    // Organization-scoped audit rows go with the organization.
    record(
        &state,
        NewAuditLog::new("organization.delete", "organization")
            .actor(ctx.user.id)
            .subject(ctx.id())
            .ip(ctx.ip.clone())
            .metadata(json!({ "name": ctx.organization.name, "slug": ctx.organization.slug })),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_all(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<Json<Vec<Organization>>> {
    Ok(Json(state.store.list_all_organizations().await?))
}
