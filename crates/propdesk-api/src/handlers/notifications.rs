//! In-app notifications and push device registration.

use std::collections::HashSet;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use propdesk_core::{
    Notification, Page, Paged, Pagination, PropdeskError, PushDevice, RegisterDevice,
    SendNotification, Validate,
};
use propdesk_integrations::PushMessage;

use super::record;
use crate::auth::{CurrentUser, OrgContext};
use crate::{ApiResult, AppState};

#[derive(Serialize)]
pub struct SendSummary {
    pub sent: usize,
    pub pushed: usize,
}

/// Stores one notification per recipient, then pushes to their devices.
/// Push delivery is best effort.
pub async fn send(
    State(state): State<AppState>,
    ctx: OrgContext,
    Json(input): Json<SendNotification>,
) -> ApiResult<(StatusCode, Json<SendSummary>)> {
    ctx.require(Page::Notifications)?;
    input.validate()?;

    let members: HashSet<Uuid> = state
        .store
        .list_members(ctx.id())
        .await?
        .into_iter()
        .map(|m| m.member.user_id)
        .collect();

    let recipients: Vec<Uuid> = match &input.user_ids {
        Some(ids) => {
            if let Some(outsider) = ids.iter().find(|id| !members.contains(id)) {
                return Err(PropdeskError::Validation(format!(
                    "user {} is not a member of this organization",
                    outsider
                ))
                .into());
            }
            let mut seen = HashSet::new();
            ids.iter().copied().filter(|id| seen.insert(*id)).collect()
        }
        None => members.into_iter().collect(),
    };

    for user_id in &recipients {
        state
            .store
            .create_notification(
                Some(ctx.id()),
                *user_id,
                &input.title,
                &input.body,
                input.url.as_deref(),
            )
            .await?;
    }

    let tokens: Vec<String> = state
        .store
        .list_push_devices(&recipients)
        .await?
        .into_iter()
        .map(|d| d.token)
        .collect();
    let pushed = if tokens.is_empty() {
        0
    } else {
        let message = PushMessage {
            title: input.title.trim().to_string(),
            body: input.body.trim().to_string(),
            url: input.url.clone(),
        };
        match state.push.send(&tokens, &message).await {
            Ok(delivered) => delivered,
            Err(e) => {
                warn!(org_id = %ctx.id(), error = %e, "push delivery failed");
                0
            }
        }
    };

    info!(org_id = %ctx.id(), sent = recipients.len(), pushed, "notification sent");
    record(
        &state,
        ctx.audit("notification.send", "notification")
            .metadata(json!({ "title": input.title, "recipients": recipients.len() })),
    )
    .await;
    Ok((
        StatusCode::CREATED,
        Json(SendSummary {
            sent: recipients.len(),
            pushed,
        }),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct NotificationList {
    #[serde(flatten)]
    pub page: Paged<Notification>,
    pub unread: i64,
}

pub async fn list(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<Json<NotificationList>> {
    let page = state
        .store
        .list_notifications(
            current.user.id,
            query.unread_only,
            Pagination {
                limit: query.limit,
                offset: query.offset,
            },
        )
        .await?;
    let unread = state.store.unread_count(current.user.id).await?;
    Ok(Json(NotificationList { page, unread }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.store.mark_notification_read(current.user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    current: CurrentUser,
) -> ApiResult<Json<serde_json::Value>> {
    let updated = state.store.mark_all_read(current.user.id).await?;
    Ok(Json(json!({ "updated": updated })))
}

pub async fn register_device(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(input): Json<RegisterDevice>,
) -> ApiResult<(StatusCode, Json<PushDevice>)> {
    input.validate()?;
    let device = state
        .store
        .register_push_device(current.user.id, &input)
        .await?;
    Ok((StatusCode::CREATED, Json(device)))
}

pub async fn remove_device(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(token): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .store
        .remove_push_device(current.user.id, &token)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
