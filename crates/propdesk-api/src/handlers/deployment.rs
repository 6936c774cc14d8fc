use axum::{extract::State, Json};

use propdesk_integrations::Deployment;

use crate::auth::AdminUser;
use crate::{ApiError, ApiResult, AppState};

const RECENT_DEPLOYMENTS: usize = 10;

/// Recent deployments of the hosting service.
pub async fn recent(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<Json<Vec<Deployment>>> {
    let railway = state
        .railway
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("deployment status is not configured".into()))?;
    Ok(Json(railway.latest_deployments(RECENT_DEPLOYMENTS).await?))
}
