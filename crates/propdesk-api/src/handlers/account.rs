//! Sign-up, login, password management and two-factor setup.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use propdesk_core::validation::{normalize_email, validate_password};
use propdesk_core::{
    NewAuditLog, NewOrganization, NewUser, Organization, PropdeskError, SignupRequest,
    UpdateProfile, User, Validate,
};
use propdesk_integrations::email::{password_reset_email, two_factor_enabled_email};

use super::record;
use crate::auth::{
    generate_totp_secret, hash_password, hash_token, otpauth_url, random_token, unix_now,
    verify_password, verify_totp, CurrentUser,
};
use crate::{ApiError, ApiResult, AppState};

#[derive(Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<Organization>,
}

pub async fn signup(
    State(state): State<AppState>,
    Json(input): Json<SignupRequest>,
) -> ApiResult<(StatusCode, Json<SessionResponse>)> {
    input.validate()?;
    let organization_input = match input.organization_name.as_deref() {
        Some(name) if !name.trim().is_empty() => {
            let org = NewOrganization {
                name: name.trim().to_string(),
            };
            org.validate()?;
            Some(org)
        }
        _ => None,
    };

    let user = state
        .store
        .create_user(&NewUser {
            email: input.email.clone(),
            full_name: input.full_name.trim().to_string(),
            password_hash: hash_password(&input.password)?,
            is_admin: false,
        })
        .await?;

    let organization = match organization_input {
        Some(org) => Some(state.store.create_organization(user.id, &org).await?),
        None => None,
    };

    record(
        &state,
        NewAuditLog::new("user.signup", "user")
            .actor(user.id)
            .subject(user.id),
    )
    .await;
    if let Some(org) = &organization {
        record(
            &state,
            NewAuditLog::new("organization.create", "organization")
                .organization(org.id)
                .actor(user.id)
                .subject(org.id),
        )
        .await;
    }

    info!(user_id = %user.id, "account created");
    let token = state.tokens.issue(user.id)?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            token,
            user,
            organization,
        }),
    ))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub code: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginRequest>,
) -> ApiResult<Json<SessionResponse>> {
    state.login_limiter.check(&input.email)?;

    let invalid = || ApiError::Unauthorized("invalid email or password".into());
    let user = state
        .store
        .get_user_by_email(&input.email)
        .await?
        .ok_or_else(invalid)?;
    if !verify_password(&input.password, &user.password_hash) {
        return Err(invalid());
    }

    if user.two_factor_enabled {
        let secret = user
            .two_factor_secret
            .as_deref()
            .ok_or_else(|| ApiError::Internal("two-factor enabled without a secret".into()))?;
        let code = input
            .code
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or(ApiError::TwoFactorRequired)?;
        if !verify_totp(secret, code, unix_now())? {
            return Err(ApiError::InvalidCode);
        }
    }

    record(
        &state,
        NewAuditLog::new("user.login", "user")
            .actor(user.id)
            .subject(user.id),
    )
    .await;

    let token = state.tokens.issue(user.id)?;
    Ok(Json(SessionResponse {
        token,
        user,
        organization: None,
    }))
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// Always answers 202 so the response does not reveal whether the email
/// has an account.
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(input): Json<ForgotPasswordRequest>,
) -> ApiResult<StatusCode> {
    state.login_limiter.check(&input.email)?;

    if let Some(user) = state.store.get_user_by_email(&input.email).await? {
        let ttl = state.settings.auth.password_reset_ttl_minutes;
        let token = random_token();
        state
            .store
            .create_password_reset(user.id, &hash_token(&token), Utc::now() + Duration::minutes(ttl))
            .await?;

        let link = state.app_link(&format!("reset-password?token={}", token));
        if let Err(e) = state
            .mailer
            .send(password_reset_email(&user.email, &link, ttl))
            .await
        {
            warn!(user_id = %user.id, error = %e, "password reset email failed");
        }
        record(
            &state,
            NewAuditLog::new("user.password_reset_requested", "user")
                .actor(user.id)
                .subject(user.id),
        )
        .await;
    }

    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(input): Json<ResetPasswordRequest>,
) -> ApiResult<StatusCode> {
    validate_password(&input.password)?;

    let reset = state
        .store
        .find_password_reset(&hash_token(input.token.trim()))
        .await?
        .filter(|r| r.is_usable(Utc::now()))
        .ok_or_else(|| ApiError::BadRequest("reset link is invalid or has expired".into()))?;

    state.store.mark_password_reset_used(reset.id).await?;
    state
        .store
        .update_password(reset.user_id, &hash_password(&input.password)?)
        .await?;

    record(
        &state,
        NewAuditLog::new("user.password_reset", "user")
            .actor(reset.user_id)
            .subject(reset.user_id),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct MeResponse {
    pub user: User,
    pub organizations: Vec<Organization>,
    pub unread_notifications: i64,
}

pub async fn me(State(state): State<AppState>, current: CurrentUser) -> ApiResult<Json<MeResponse>> {
    let organizations = state
        .store
        .list_organizations_for_user(current.user.id)
        .await?;
    let unread_notifications = state.store.unread_count(current.user.id).await?;
    Ok(Json(MeResponse {
        user: current.user,
        organizations,
        unread_notifications,
    }))
}

pub async fn update_me(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(input): Json<UpdateProfile>,
) -> ApiResult<Json<User>> {
    input.validate()?;
    let user = state
        .store
        .update_user_profile(current.user.id, &input)
        .await?;
    record(&state, current.audit("user.update_profile", "user").subject(user.id)).await;
    Ok(Json(user))
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(input): Json<ChangePasswordRequest>,
) -> ApiResult<StatusCode> {
    if !verify_password(&input.current_password, &current.user.password_hash) {
        return Err(ApiError::Unauthorized("current password is incorrect".into()));
    }
    validate_password(&input.new_password)?;

    state
        .store
        .update_password(current.user.id, &hash_password(&input.new_password)?)
        .await?;
    record(
        &state,
        current.audit("user.change_password", "user").subject(current.user.id),
    )
    .await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct TwoFactorSetup {
    pub secret: String,
    pub otpauth_url: String,
}

/// Stores a new pending secret. It takes effect once confirmed with a code.
pub async fn two_factor_setup(
    State(state): State<AppState>,
    current: CurrentUser,
) -> ApiResult<Json<TwoFactorSetup>> {
    if current.user.two_factor_enabled {
        return Err(PropdeskError::Conflict("two-factor authentication is already enabled".into()).into());
    }

    let secret = generate_totp_secret();
    state
        .store
        .set_two_factor(current.user.id, Some(&secret), false)
        .await?;

    let otpauth_url = otpauth_url(
        &secret,
        &state.settings.auth.totp_issuer,
        &normalize_email(&current.user.email),
    )?;
    Ok(Json(TwoFactorSetup {
        secret,
        otpauth_url,
    }))
}

#[derive(Deserialize)]
pub struct TwoFactorCode {
    pub code: String,
}

pub async fn two_factor_enable(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(input): Json<TwoFactorCode>,
) -> ApiResult<Json<User>> {
    let user = &current.user;
    if user.two_factor_enabled {
        return Err(PropdeskError::Conflict("two-factor authentication is already enabled".into()).into());
    }
    let secret = user
        .two_factor_secret
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("start two-factor setup first".into()))?;
    if !verify_totp(secret, &input.code, unix_now())? {
        return Err(ApiError::InvalidCode);
    }

    let updated = state
        .store
        .set_two_factor(user.id, Some(secret), true)
        .await?;
    if let Err(e) = state
        .mailer
        .send(two_factor_enabled_email(&updated.email, &updated.full_name))
        .await
    {
        warn!(user_id = %updated.id, error = %e, "two-factor confirmation email failed");
    }
    record(&state, current.audit("user.enable_2fa", "user").subject(user.id)).await;
    Ok(Json(updated))
}

pub async fn two_factor_disable(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(input): Json<TwoFactorCode>,
) -> ApiResult<Json<User>> {
    let user = &current.user;
    let secret = match (user.two_factor_enabled, user.two_factor_secret.as_deref()) {
        (true, Some(secret)) => secret,
        _ => {
            return Err(ApiError::BadRequest(
                "two-factor authentication is not enabled".into(),
            ))
        }
    };
    if !verify_totp(secret, &input.code, unix_now())? {
        return Err(ApiError::InvalidCode);
    }

    let updated = state.store.set_two_factor(user.id, None, false).await?;
    record(&state, current.audit("user.disable_2fa", "user").subject(user.id)).await;
    Ok(Json(updated))
}
