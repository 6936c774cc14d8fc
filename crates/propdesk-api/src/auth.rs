//! Authentication: password hashing, session tokens, TOTP, login throttling
//! and the request extractors that resolve the caller.

use std::num::NonZeroU32;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::{FromRequestParts, RawPathParams};
use axum::http::{header, request::Parts, HeaderMap};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use totp_rs::{Secret, TOTP};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use propdesk_core::validation::normalize_email;
use propdesk_core::{
    AccessContext, NewAuditLog, Organization, Page, PropdeskError, Settings, User,
};

use crate::{ApiError, ApiResult, AppState};

const TOTP_DIGITS: usize = 6;
const TOTP_STEP_SECS: u64 = 30;
const TOTP_SKEW: u8 = 1;

// ---------------------------------------------------------------------------
// Passwords and opaque tokens
// ---------------------------------------------------------------------------

/// Hashes `password` into an Argon2id PHC string.
pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
        .map_err(|e| ApiError::Internal(format!("salt generation failed: {}", e)))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("password hashing failed: {}", e)))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!(error = %e, "stored password hash is unreadable");
            false
        }
    }
}

/// 32 random bytes, URL-safe base64 without padding.
pub fn random_token() -> String {
    URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>())
}

/// Hex SHA-256 of a token; only this form is persisted for reset links.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

// ---------------------------------------------------------------------------
// Session tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// Issues and checks HS256 session tokens.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &[u8], ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl: Duration::hours(ttl_hours),
        }
    }

    /// Without a configured secret (development only) a random one is used,
    /// so sessions do not survive a restart.
    pub fn from_settings(settings: &Settings) -> Self {
        match &settings.auth.jwt_secret {
            Some(secret) => Self::new(secret.expose_secret().as_bytes(), settings.auth.token_ttl_hours),
            None => {
                warn!("auth.jwt_secret is not set; using an ephemeral signing key");
                Self::new(&rand::random::<[u8; 32]>(), settings.auth.token_ttl_hours)
            }
        }
    }

    pub fn issue(&self, user_id: Uuid) -> ApiResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ApiError::Internal(format!("token signing failed: {}", e)))
    }

    pub fn verify(&self, token: &str) -> ApiResult<Uuid> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|e| {
                debug!(error = %e, "rejected session token");
                ApiError::Unauthorized("invalid or expired session".into())
            })?;
        Uuid::parse_str(&data.claims.sub)
            .map_err(|_| ApiError::Unauthorized("invalid or expired session".into()))
    }
}

// ---------------------------------------------------------------------------
// TOTP
// ---------------------------------------------------------------------------

/// A fresh 20-byte secret, base32 encoded.
pub fn generate_totp_secret() -> String {
    Secret::Raw(rand::random::<[u8; 20]>().to_vec())
        .to_encoded()
        .to_string()
}

fn totp(secret: &str) -> ApiResult<TOTP> {
    let bytes = Secret::Encoded(secret.to_string())
        .to_bytes()
        .map_err(|e| ApiError::Internal(format!("stored TOTP secret is invalid: {:?}", e)))?;
    TOTP::new(
        totp_rs::Algorithm::SHA1,
        TOTP_DIGITS,
        TOTP_SKEW,
        TOTP_STEP_SECS,
        bytes,
    )
    .map_err(|e| ApiError::Internal(format!("TOTP setup failed: {}", e)))
}

/// Checks `code` at unix time `now`, allowing one step of clock skew.
pub fn verify_totp(secret: &str, code: &str, now: u64) -> ApiResult<bool> {
    Ok(totp(secret)?.check(code.trim(), now))
}

pub fn totp_code(secret: &str, now: u64) -> ApiResult<String> {
    Ok(totp(secret)?.generate(now))
}

/// `otpauth://totp/...` URI for authenticator apps.
pub fn otpauth_url(secret: &str, issuer: &str, account: &str) -> ApiResult<String> {
    let mut url = Url::parse("otpauth://totp/")
        .map_err(|e| ApiError::Internal(format!("otpauth url: {}", e)))?;
    url.set_path(&format!("{}:{}", issuer, account));
    url.query_pairs_mut()
        .append_pair("secret", secret)
        .append_pair("issuer", issuer)
        .append_pair("algorithm", "SHA1")
        .append_pair("digits", &TOTP_DIGITS.to_string())
        .append_pair("period", &TOTP_STEP_SECS.to_string());
    Ok(url.to_string())
}

pub fn unix_now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

// ---------------------------------------------------------------------------
// Login throttling
// ---------------------------------------------------------------------------

/// Per-email limiter for login and password-reset requests.
pub struct LoginLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl LoginLimiter {
    pub fn new(per_minute: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    pub fn check(&self, email: &str) -> ApiResult<()> {
        let key = normalize_email(email);
        self.limiter.check_key(&key).map_err(|_| {
            warn!(email = %key, "login attempts throttled");
            ApiError::TooManyRequests
        })
    }
}

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

async fn user_from_token(state: &AppState, token: &str) -> ApiResult<User> {
    let user_id = state.tokens.verify(token)?;
    match state.store.get_user(user_id).await {
        Ok(user) => Ok(user),
        Err(PropdeskError::NotFound(_)) => {
            Err(ApiError::Unauthorized("account no longer exists".into()))
        }
        Err(e) => Err(e.into()),
    }
}

/// The signed-in user. Rejects with 401 when there is no valid session.
pub struct CurrentUser {
    pub user: User,
    pub ip: Option<String>,
}

impl CurrentUser {
    pub fn audit(&self, action: &str, subject_type: &str) -> NewAuditLog {
        NewAuditLog::new(action, subject_type)
            .actor(self.user.id)
            .ip(self.ip.clone())
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> ApiResult<Self> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::Unauthorized("authentication required".into()))?;
        let user = user_from_token(state, token).await?;
        Ok(Self {
            user,
            ip: client_ip(&parts.headers),
        })
    }
}

/// The caller if a session was presented. A presented but invalid session
/// is still rejected.
pub struct MaybeUser {
    pub user: Option<User>,
    pub ip: Option<String>,
}

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> ApiResult<Self> {
        let user = match bearer_token(&parts.headers) {
            Some(token) => Some(user_from_token(state, token).await?),
            None => None,
        };
        Ok(Self {
            user,
            ip: client_ip(&parts.headers),
        })
    }
}

/// A platform administrator.
pub struct AdminUser(pub CurrentUser);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> ApiResult<Self> {
        let current = CurrentUser::from_request_parts(parts, state).await?;
        if !current.user.is_admin {
            return Err(ApiError::Forbidden("platform administrators only".into()));
        }
        Ok(Self(current))
    }
}

/// The caller's resolved access inside the organization named by the
/// `{org}` path segment.
pub struct OrgContext {
    pub user: User,
    pub organization: Organization,
    pub access: AccessContext,
    pub ip: Option<String>,
}

impl OrgContext {
    pub fn id(&self) -> Uuid {
        self.organization.id
    }

    pub fn require(&self, page: Page) -> ApiResult<()> {
        Ok(self.access.require_page(page)?)
    }

    /// Page access plus owner/admin standing.
    pub fn require_manager(&self, page: Page) -> ApiResult<()> {
        self.require(page)?;
        Ok(self.access.require_manager()?)
    }

    pub fn audit(&self, action: &str, subject_type: &str) -> NewAuditLog {
        NewAuditLog::new(action, subject_type)
            .organization(self.organization.id)
            .actor(self.user.id)
            .ip(self.ip.clone())
    }
}

impl FromRequestParts<AppState> for OrgContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> ApiResult<Self> {
        let current = CurrentUser::from_request_parts(parts, state).await?;

        let params = RawPathParams::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        let raw = params
            .iter()
            .find(|(key, _)| *key == "org")
            .map(|(_, value)| value)
            .ok_or_else(|| ApiError::Internal("route has no {org} segment".into()))?;
        let organization_id = Uuid::parse_str(raw)
            .map_err(|_| ApiError::BadRequest("invalid organization id".into()))?;

        let organization = state.store.get_organization(organization_id).await?;
        let membership = state
            .store
            .get_membership(organization_id, current.user.id)
            .await?;
        let access = AccessContext::resolve(&current.user, organization_id, membership.as_ref())?;

        Ok(Self {
            user: current.user,
            organization,
            access,
            ip: current.ip,
        })
    }
}
