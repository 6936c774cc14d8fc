//! Database snapshots managed by platform admins.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use uuid::Uuid;

use propdesk_core::Backup;

use super::record;
use crate::auth::AdminUser;
use crate::metrics::BACKUPS_TOTAL;
use crate::{ApiResult, AppState};

pub async fn list(State(state): State<AppState>, _admin: AdminUser) -> ApiResult<Json<Vec<Backup>>> {
    Ok(Json(state.store.list_backups().await?))
}

pub async fn create(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
) -> ApiResult<(StatusCode, Json<Backup>)> {
    let result = state
        .store
        .create_backup(&state.backup_dir(), Some(admin.user.id))
        .await;
    let outcome = if result.is_ok() { "completed" } else { "failed" };
    BACKUPS_TOTAL.with_label_values(&[outcome]).inc();

    let backup = result?;
    record(
        &state,
        admin
            .audit("backup.create", "backup")
            .subject(backup.id)
            .metadata(json!({ "file_name": backup.file_name, "size_bytes": backup.size_bytes })),
    )
    .await;
    Ok((StatusCode::CREATED, Json(backup)))
}

pub async fn delete(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let backup = state.store.delete_backup(&state.backup_dir(), id).await?;
    record(
        &state,
        admin
            .audit("backup.delete", "backup")
            .subject(id)
            .metadata(json!({ "file_name": backup.file_name })),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}
