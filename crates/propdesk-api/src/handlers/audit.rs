use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use propdesk_core::{AuditFilter, AuditLog, Page, Paged};

use crate::auth::{AdminUser, OrgContext};
use crate::{ApiResult, AppState};

/// Audit trail of one organization. The organization always comes from the
/// path, never from the query.
pub async fn org_logs(
    State(state): State<AppState>,
    ctx: OrgContext,
    Query(mut filter): Query<AuditFilter>,
) -> ApiResult<Json<Paged<AuditLog>>> {
    ctx.require(Page::AuditLogs)?;
    filter.organization_id = Some(ctx.id());
    Ok(Json(state.store.list_audit(&filter).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct AdminAuditQuery {
    pub organization_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub action: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl From<AdminAuditQuery> for AuditFilter {
    fn from(query: AdminAuditQuery) -> Self {
        AuditFilter {
            organization_id: query.organization_id,
            actor_id: query.actor_id,
            action: query.action,
            since: query.since,
            limit: query.limit,
            offset: query.offset,
        }
    }
}

/// Platform-wide audit trail, optionally narrowed to one organization.
pub async fn admin_logs(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<AdminAuditQuery>,
) -> ApiResult<Json<Paged<AuditLog>>> {
    Ok(Json(state.store.list_audit(&query.into()).await?))
}
