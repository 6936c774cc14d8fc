use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use uuid::Uuid;

use propdesk_core::{Lease, LeaseFilter, NewLease, Page, Paged, UpdateLease, Validate};
use propdesk_integrations::search::LEASES_INDEX;

use super::{index_lease, record, unindex};
use crate::auth::OrgContext;
use crate::{ApiError, ApiResult, AppState};

/// A lease may only point at an entity the caller can see.
async fn require_visible_entity(state: &AppState, ctx: &OrgContext, entity_id: Uuid) -> ApiResult<()> {
    let visible = state
        .store
        .entity_in_scope(ctx.id(), entity_id, &ctx.access.property_scope())
        .await?;
    if visible {
        Ok(())
    } else {
        Err(ApiError::Forbidden("no access to that property".into()))
    }
}

pub async fn list(
    State(state): State<AppState>,
    ctx: OrgContext,
    Query(filter): Query<LeaseFilter>,
) -> ApiResult<Json<Paged<Lease>>> {
    ctx.require(Page::Leases)?;
    Ok(Json(
        state
            .store
            .list_leases(ctx.id(), &filter, &ctx.access.lease_scope())
            .await?,
    ))
}

pub async fn create(
    State(state): State<AppState>,
    ctx: OrgContext,
    Json(input): Json<NewLease>,
) -> ApiResult<(StatusCode, Json<Lease>)> {
    ctx.require(Page::Leases)?;
    input.validate()?;
    require_visible_entity(&state, &ctx, input.entity_id).await?;

    let lease = state.store.create_lease(ctx.id(), &input).await?;
    index_lease(&state, &lease).await;
    record(
        &state,
        ctx.audit("lease.create", "lease")
            .subject(lease.id)
            .metadata(json!({ "entity_id": lease.entity_id, "tenant_name": lease.tenant_name })),
    )
    .await;
    Ok((StatusCode::CREATED, Json(lease)))
}

pub async fn get(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path((_org, id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Lease>> {
    ctx.require(Page::Leases)?;
    Ok(Json(
        state
            .store
            .get_lease(ctx.id(), id, &ctx.access.lease_scope())
            .await?,
    ))
}

pub async fn update(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path((_org, id)): Path<(Uuid, Uuid)>,
    Json(input): Json<UpdateLease>,
) -> ApiResult<Json<Lease>> {
    ctx.require(Page::Leases)?;
    let current = state
        .store
        .get_lease(ctx.id(), id, &ctx.access.lease_scope())
        .await?;
    let next = input.apply(&current)?;
    if next.entity_id != current.entity_id {
        require_visible_entity(&state, &ctx, next.entity_id).await?;
    }

    let lease = state.store.update_lease(&next).await?;
    index_lease(&state, &lease).await;

    let mut metadata = json!({});
    if lease.status != current.status {
        metadata = json!({ "from": current.status, "to": lease.status });
    }
    record(
        &state,
        ctx.audit("lease.update", "lease")
            .subject(lease.id)
            .metadata(metadata),
    )
    .await;
    Ok(Json(lease))
}

pub async fn delete(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path((_org, id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    ctx.require(Page::Leases)?;
    let lease = state
        .store
        .get_lease(ctx.id(), id, &ctx.access.lease_scope())
        .await?;
    state.store.delete_lease(ctx.id(), id).await?;

    unindex(&state, LEASES_INDEX, id).await;
    record(
        &state,
        ctx.audit("lease.delete", "lease")
            .subject(id)
            .metadata(json!({ "tenant_name": lease.tenant_name })),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}
