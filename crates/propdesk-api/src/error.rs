use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use propdesk_core::{PropdeskError, ValidationError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Propdesk(#[from] PropdeskError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Two-factor code required")]
    TwoFactorRequired,

    #[error("Invalid two-factor code")]
    InvalidCode,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Too many attempts, try again later")]
    TooManyRequests,

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Propdesk(err.into())
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Propdesk(err) => match err {
                PropdeskError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
                PropdeskError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                PropdeskError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
                PropdeskError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
                PropdeskError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
                PropdeskError::InvalidOperation(_) => (StatusCode::BAD_REQUEST, "invalid_operation"),
                PropdeskError::Integration(_) => (StatusCode::BAD_GATEWAY, "integration_error"),
                PropdeskError::Io(_) | PropdeskError::Serialization(_) | PropdeskError::Database(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                }
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::TwoFactorRequired => (StatusCode::UNAUTHORIZED, "two_factor_required"),
            ApiError::InvalidCode => (StatusCode::UNAUTHORIZED, "invalid_code"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::Gone(_) => (StatusCode::GONE, "gone"),
            ApiError::TooManyRequests => (StatusCode::TOO_MANY_REQUESTS, "too_many_requests"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            ApiError::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Server-side failures are logged in full and reported generically.
        let message = if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": message,
            "code": code,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
