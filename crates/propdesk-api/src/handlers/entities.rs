//! Properties, units and rooms.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use propdesk_core::{
    DataScope, EntityFilter, LeaseableEntity, NewEntity, Page, Paged, UpdateEntity, Validate,
};
use propdesk_integrations::search::ENTITIES_INDEX;

use super::{index_entity, record, unindex};
use crate::auth::OrgContext;
use crate::{ApiError, ApiResult, AppState};

pub async fn list(
    State(state): State<AppState>,
    ctx: OrgContext,
    Query(filter): Query<EntityFilter>,
) -> ApiResult<Json<Paged<LeaseableEntity>>> {
    ctx.require(Page::Properties)?;
    let page = state
        .store
        .list_entities(ctx.id(), &filter, &ctx.access.property_scope())
        .await?;
    Ok(Json(page))
}

/// Top-level properties need unrestricted property access; children need
/// a visible parent.
pub async fn create(
    State(state): State<AppState>,
    ctx: OrgContext,
    Json(input): Json<NewEntity>,
) -> ApiResult<(StatusCode, Json<LeaseableEntity>)> {
    ctx.require(Page::Properties)?;
    input.validate()?;

    let scope = ctx.access.property_scope();
    match input.parent_id {
        None => {
            if scope != DataScope::All {
                return Err(ApiError::Forbidden(
                    "adding properties requires access to all properties".into(),
                ));
            }
        }
        Some(parent_id) => {
            if !state.store.entity_in_scope(ctx.id(), parent_id, &scope).await? {
                return Err(ApiError::Forbidden("no access to the parent entity".into()));
            }
        }
    }

    let entity = state.store.create_entity(ctx.id(), &input).await?;
    index_entity(&state, &entity).await;
    record(
        &state,
        ctx.audit("entity.create", entity.kind.as_str())
            .subject(entity.id)
            .metadata(serde_json::json!({ "name": entity.name })),
    )
    .await;
    Ok((StatusCode::CREATED, Json(entity)))
}

pub async fn get(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path((_org, id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<LeaseableEntity>> {
    ctx.require(Page::Properties)?;
    let entity = state
        .store
        .get_entity(ctx.id(), id, &ctx.access.property_scope())
        .await?;
    Ok(Json(entity))
}

pub async fn update(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path((_org, id)): Path<(Uuid, Uuid)>,
    Json(input): Json<UpdateEntity>,
) -> ApiResult<Json<LeaseableEntity>> {
    ctx.require(Page::Properties)?;
    input.validate()?;

    state
        .store
        .get_entity(ctx.id(), id, &ctx.access.property_scope())
        .await?;
    let entity = state.store.update_entity(ctx.id(), id, &input).await?;

    index_entity(&state, &entity).await;
    record(&state, ctx.audit("entity.update", entity.kind.as_str()).subject(id)).await;
    Ok(Json(entity))
}

pub async fn delete(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path((_org, id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    ctx.require(Page::Properties)?;
    let entity = state
        .store
        .get_entity(ctx.id(), id, &ctx.access.property_scope())
        .await?;
    state.store.delete_entity(ctx.id(), id).await?;

    unindex(&state, ENTITIES_INDEX, id).await;
    record(
        &state,
        ctx.audit("entity.delete", entity.kind.as_str())
            .subject(id)
            .metadata(serde_json::json!({ "name": entity.name })),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}
