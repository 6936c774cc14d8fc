use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::handlers::{
    account, audit, backups, billing, blog, deployment, entities, health, invitations, leases,
    notifications, organizations, team,
};
use crate::{metrics, AppState};

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.security.allowed_origins);

    Router::new()
        // Health
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics_handler))
        // Account
        .route("/auth/signup", post(account::signup))
        .route("/auth/login", post(account::login))
        .route("/auth/password/forgot", post(account::forgot_password))
        .route("/auth/password/reset", post(account::reset_password))
        .route("/auth/password/change", post(account::change_password))
        .route("/auth/me", get(account::me).patch(account::update_me))
        .route("/auth/2fa/setup", post(account::two_factor_setup))
        .route("/auth/2fa/enable", post(account::two_factor_enable))
        .route("/auth/2fa/disable", post(account::two_factor_disable))
        // Organizations
        .route("/orgs", get(organizations::list_mine).post(organizations::create))
        .route(
            "/orgs/{org}",
            get(organizations::get)
                .patch(organizations::update)
                .delete(organizations::delete),
        )
        .route("/orgs/{org}/entities", get(entities::list).post(entities::create))
        .route(
            "/orgs/{org}/entities/{id}",
            get(entities::get).patch(entities::update).delete(entities::delete),
        )
        .route("/orgs/{org}/leases", get(leases::list).post(leases::create))
        .route(
            "/orgs/{org}/leases/{id}",
            get(leases::get).patch(leases::update).delete(leases::delete),
        )
        .route("/orgs/{org}/team", get(team::list))
        .route(
            "/orgs/{org}/team/{member}",
            patch(team::update).delete(team::remove),
        )
        .route(
            "/orgs/{org}/invitations",
            get(invitations::list).post(invitations::create),
        )
        .route("/orgs/{org}/invitations/{id}", delete(invitations::revoke))
        .route("/orgs/{org}/invitations/{id}/resend", post(invitations::resend))
        .route("/orgs/{org}/notifications", post(notifications::send))
        .route("/orgs/{org}/audit-logs", get(audit::org_logs))
        .route("/orgs/{org}/billing", get(billing::get))
        .route("/orgs/{org}/billing/checkout", post(billing::checkout))
        .route("/orgs/{org}/billing/portal", post(billing::portal))
        // Invitations by token
        .route("/invitations/{token}", get(invitations::preview))
        .route("/invitations/{token}/accept", post(invitations::accept))
        // Per-user notifications and push devices
        .route("/notifications", get(notifications::list))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/{id}/read", post(notifications::mark_read))
        .route("/push/devices", post(notifications::register_device))
        .route("/push/devices/{token}", delete(notifications::remove_device))
        // Webhooks
        .route("/webhooks/stripe", post(billing::stripe_webhook))
        // Public blog
        .route("/blog", get(blog::list_published))
        .route("/blog/{slug}", get(blog::get_by_slug))
        // Platform administration
        .route("/admin/organizations", get(organizations::list_all))
        .route("/admin/audit-logs", get(audit::admin_logs))
        .route("/admin/deployment", get(deployment::recent))
        .route("/admin/backups", get(backups::list).post(backups::create))
        .route("/admin/backups/{id}", delete(backups::delete))
        .route("/admin/blog", get(blog::list).post(blog::create))
        .route(
            "/admin/blog/{id}",
            patch(blog::update).delete(blog::delete),
        )
        .route("/admin/blog/{id}/publish", post(blog::publish))
        .route("/admin/blog/{id}/unpublish", post(blog::unpublish))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(middleware::from_fn(metrics::track_metrics)),
        )
}

/// Any origin when none are configured, otherwise exactly the listed ones.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    if allowed_origins.is_empty() {
        return base.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(origins))
}
