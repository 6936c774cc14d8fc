//! Subscription billing through Stripe Checkout and the customer portal,
//! plus the webhook that keeps organizations in sync with Stripe.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use propdesk_core::{
    BillingUpdate, NewAuditLog, Organization, Page, Plan, PropdeskError, SubscriptionStatus,
};
use propdesk_integrations::stripe::{verify_webhook, BillingChange, WebhookEvent};
use propdesk_integrations::StripeClient;

use super::record;
use crate::auth::OrgContext;
use crate::{ApiError, ApiResult, AppState};

const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Serialize)]
pub struct BillingOverview {
    pub plan: Plan,
    pub subscription_status: SubscriptionStatus,
    pub has_customer: bool,
    pub stripe_enabled: bool,
}

pub async fn get(
    State(state): State<AppState>,
    ctx: OrgContext,
) -> ApiResult<Json<BillingOverview>> {
    ctx.require(Page::Billing)?;
    Ok(Json(BillingOverview {
        plan: ctx.organization.plan,
        subscription_status: ctx.organization.subscription_status,
        has_customer: ctx.organization.stripe_customer_id.is_some(),
        stripe_enabled: state.stripe.is_some(),
    }))
}

fn stripe(state: &AppState) -> ApiResult<&Arc<StripeClient>> {
    state
        .stripe
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("billing is not configured".into()))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub plan: Plan,
}

#[derive(Serialize)]
pub struct RedirectUrl {
    pub url: String,
}

pub async fn checkout(
    State(state): State<AppState>,
    ctx: OrgContext,
    Json(input): Json<CheckoutRequest>,
) -> ApiResult<Json<RedirectUrl>> {
    ctx.require_manager(Page::Billing)?;
    let client = stripe(&state)?;
    let price = state.prices.price_for(input.plan).ok_or_else(|| {
        PropdeskError::Validation(format!("plan '{}' cannot be purchased", input.plan))
    })?;

    let org = &ctx.organization;
    let customer_id = match &org.stripe_customer_id {
        Some(id) => id.clone(),
        None => {
            let customer = client
                .create_customer(&ctx.user.email, &org.name, &org.id.to_string())
                .await?;
            state
                .store
                .update_billing(
                    org.id,
                    &BillingUpdate {
                        stripe_customer_id: Some(customer.id.clone()),
                        stripe_subscription_id: None,
                        plan: org.plan,
                        subscription_status: org.subscription_status,
                    },
                )
                .await?;
            customer.id
        }
    };

    let base = format!("orgs/{}/billing", org.id);
    let session = client
        .create_checkout_session(
            &customer_id,
            price,
            &org.id.to_string(),
            &state.app_link(&format!("{}?checkout=success", base)),
            &state.app_link(&format!("{}?checkout=canceled", base)),
        )
        .await?;
    let url = session.url.ok_or_else(|| {
        PropdeskError::Integration("stripe checkout session has no url".into())
    })?;

    record(
        &state,
        ctx.audit("billing.checkout", "organization")
            .subject(org.id)
            .metadata(json!({ "plan": input.plan, "session_id": session.id })),
    )
    .await;
    Ok(Json(RedirectUrl { url }))
}

pub async fn portal(
    State(state): State<AppState>,
    ctx: OrgContext,
) -> ApiResult<Json<RedirectUrl>> {
    ctx.require_manager(Page::Billing)?;
    let client = stripe(&state)?;
    let customer_id = ctx.organization.stripe_customer_id.as_deref().ok_or_else(|| {
        PropdeskError::Conflict("organization has no billing account yet".into())
    })?;

    let session = client
        .create_portal_session(
            customer_id,
            &state.app_link(&format!("orgs/{}/billing", ctx.id())),
        )
        .await?;
    Ok(Json(RedirectUrl { url: session.url }))
}

async fn find_organization(
    state: &AppState,
    change: &BillingChange,
) -> ApiResult<Option<Organization>> {
    let by_reference = change
        .organization_id
        .as_deref()
        .and_then(|id| Uuid::parse_str(id).ok());
    if let Some(id) = by_reference {
        match state.store.get_organization(id).await {
            Ok(org) => return Ok(Some(org)),
            Err(PropdeskError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(state
        .store
        .get_organization_by_stripe_customer(&change.customer_id)
        .await?)
}

/// Plan for a change whose event did not carry a recognizable price. Asks
/// Stripe for the subscription and falls back to the current plan.
async fn resolve_plan(state: &AppState, change: &BillingChange, current: Plan) -> Plan {
    if let Some(plan) = change.plan {
        return plan;
    }
    let (Some(client), Some(subscription_id)) = (&state.stripe, &change.subscription_id) else {
        return current;
    };
    match client.get_subscription(subscription_id).await {
        Ok(sub) => sub
            .price_id()
            .and_then(|price| state.prices.plan_for(price))
            .unwrap_or(current),
        Err(e) => {
            warn!(subscription_id = %subscription_id, error = %e, "subscription lookup failed");
            current
        }
    }
}

/// Stripe webhook receiver. Events for unknown customers are acknowledged
/// and dropped so Stripe stops retrying them.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let secret = state
        .settings
        .stripe
        .webhook_secret
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("webhooks are not configured".into()))?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing Stripe-Signature header".into()))?;

    verify_webhook(
        &body,
        signature,
        secret.expose_secret(),
        state.settings.stripe.webhook_tolerance_secs,
        chrono::Utc::now().timestamp(),
    )
    .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let event = WebhookEvent::parse(&body)?;
    let received = (StatusCode::OK, Json(json!({ "received": true })));

    let Some(change) = event.billing_change(&state.prices)? else {
        debug!(event_id = %event.id, kind = %event.kind, "ignoring webhook event");
        return Ok(received);
    };
    let Some(org) = find_organization(&state, &change).await? else {
        warn!(
            event_id = %event.id,
            customer_id = %change.customer_id,
            "webhook for unknown customer"
        );
        return Ok(received);
    };

    let plan = resolve_plan(&state, &change, org.plan).await;
    let updated = state
        .store
        .update_billing(
            org.id,
            &BillingUpdate {
                stripe_customer_id: Some(change.customer_id.clone()),
                stripe_subscription_id: change.subscription_id.clone(),
                plan,
                subscription_status: change.status,
            },
        )
        .await?;

    info!(
        org_id = %org.id,
        event = %event.kind,
        plan = %updated.plan,
        status = %updated.subscription_status,
        "billing updated"
    );
    record(
        &state,
        NewAuditLog::new("billing.webhook", "organization")
            .organization(org.id)
            .subject(org.id)
            .metadata(json!({
                "event_id": event.id,
                "event": event.kind,
                "plan": updated.plan,
                "status": updated.subscription_status,
            })),
    )
    .await;
    Ok(received)
}
