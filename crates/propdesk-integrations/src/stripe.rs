//! Stripe billing: customers, Checkout and the customer portal, plus webhook
//! verification and decoding.

use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use propdesk_core::config::StripeConfig;
use propdesk_core::{Plan, PropdeskError, Result, SubscriptionStatus};

use crate::http::{build_client, ensure_success, join, request_err};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalSession {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub customer: String,
    pub status: String,
    #[serde(default)]
    pub items: SubscriptionItems,
}

impl Subscription {
    pub fn price_id(&self) -> Option<&str> {
        self.items.data.first().map(|item| item.price.id.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub price: Price,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub id: String,
}

/// Maps configured Stripe price ids to plans.
#[derive(Debug, Clone, Default)]
pub struct PriceCatalog {
    pub pro: Option<String>,
    pub enterprise: Option<String>,
}

impl PriceCatalog {
    pub fn from_config(config: &StripeConfig) -> Self {
        Self {
            pro: config.pro_price_id.clone(),
            enterprise: config.enterprise_price_id.clone(),
        }
    }

    pub fn price_for(&self, plan: Plan) -> Option<&str> {
        match plan {
            Plan::Free => None,
            Plan::Pro => self.pro.as_deref(),
            Plan::Enterprise => self.enterprise.as_deref(),
        }
    }

    pub fn plan_for(&self, price_id: &str) -> Option<Plan> {
        if self.pro.as_deref() == Some(price_id) {
            Some(Plan::Pro)
        } else if self.enterprise.as_deref() == Some(price_id) {
            Some(Plan::Enterprise)
        } else {
            None
        }
    }
}

pub struct StripeClient {
    client: Client,
    api_base: String,
    secret_key: SecretString,
}

impl StripeClient {
    pub fn new(api_base: &str, secret_key: SecretString) -> Result<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(20))?,
            api_base: api_base.to_string(),
            secret_key,
        })
    }

    /// `None` when no secret key is configured.
    pub fn from_config(config: &StripeConfig) -> Result<Option<Self>> {
        config
            .secret_key
            .as_ref()
            .map(|key| Self::new(&config.api_base, key.clone()))
            .transpose()
    }

    async fn post_form<T: DeserializeOwned>(&self, path: &str, form: &[(&str, String)]) -> Result<T> {
        let response = self
            .client
            .post(join(&self.api_base, path))
            .bearer_auth(self.secret_key.expose_secret())
            .form(form)
            .send()
            .await
            .map_err(|e| request_err("stripe", e))?;

        ensure_success("stripe", response)
            .await?
            .json()
            .await
            .map_err(|e| request_err("stripe", e))
    }

    pub async fn create_customer(
        &self,
        email: &str,
        name: &str,
        organization_id: &str,
    ) -> Result<Customer> {
        let customer: Customer = self
            .post_form(
                "v1/customers",
                &[
                    ("email", email.to_string()),
                    ("name", name.to_string()),
                    ("metadata[organization_id]", organization_id.to_string()),
                ],
            )
            .await?;
        debug!(customer_id = %customer.id, "stripe customer created");
        Ok(customer)
    }

    pub async fn create_checkout_session(
        &self,
        customer_id: &str,
        price_id: &str,
        organization_id: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession> {
        self.post_form(
            "v1/checkout/sessions",
            &[
                ("mode", "subscription".to_string()),
                ("customer", customer_id.to_string()),
                ("client_reference_id", organization_id.to_string()),
                ("line_items[0][price]", price_id.to_string()),
                ("line_items[0][quantity]", "1".to_string()),
                ("success_url", success_url.to_string()),
                ("cancel_url", cancel_url.to_string()),
            ],
        )
        .await
    }

    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<PortalSession> {
        self.post_form(
            "v1/billing_portal/sessions",
            &[
                ("customer", customer_id.to_string()),
                ("return_url", return_url.to_string()),
            ],
        )
        .await
    }

    pub async fn get_subscription(&self, subscription_id: &str) -> Result<Subscription> {
        let response = self
            .client
            .get(join(
                &self.api_base,
                &format!("v1/subscriptions/{}", subscription_id),
            ))
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await
            .map_err(|e| request_err("stripe", e))?;

        ensure_success("stripe", response)
            .await?
            .json()
            .await
            .map_err(|e| request_err("stripe", e))
    }
}

/// Checks a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`)
/// against `payload`. The timestamp must lie within `tolerance_secs` of
/// `now`.
pub fn verify_webhook(
    payload: &str,
    signature_header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures = Vec::new();
    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| PropdeskError::Unauthorized("webhook signature has no timestamp".into()))?;
    if signatures.is_empty() {
        return Err(PropdeskError::Unauthorized(
            "webhook signature has no v1 entry".into(),
        ));
    }
    let tolerance = u64::try_from(tolerance_secs).unwrap_or(0);
    let within_tolerance = now
        .checked_sub(timestamp)
        .map(i64::unsigned_abs)
        .is_some_and(|skew| skew <= tolerance);
    if !within_tolerance {
        return Err(PropdeskError::Unauthorized(
            "webhook timestamp outside tolerance".into(),
        ));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PropdeskError::Integration(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());

    let valid = signatures.iter().any(|sig| match hex::decode(sig) {
        Ok(bytes) => mac.clone().verify_slice(&bytes).is_ok(),
        Err(_) => false,
    });

    if valid {
        Ok(())
    } else {
        Err(PropdeskError::Unauthorized(
            "webhook signature mismatch".into(),
        ))
    }
}

/// Builds a valid signature header for `payload`, as Stripe would send it.
#[cfg(any(test, feature = "test_utils"))]
pub fn sign_webhook(payload: &str, secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key");
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    )
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// The billing consequence of a webhook event.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingChange {
    pub customer_id: String,
    pub subscription_id: Option<String>,
    /// Set by Checkout through `client_reference_id`.
    pub organization_id: Option<String>,
    pub status: SubscriptionStatus,
    /// `None` when the plan cannot be told from the event.
    pub plan: Option<Plan>,
}

impl WebhookEvent {
    pub fn parse(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|e| PropdeskError::Validation(format!("malformed webhook event: {}", e)))
    }

    /// Billing update carried by this event, if it is one we act on.
    pub fn billing_change(&self, prices: &PriceCatalog) -> Result<Option<BillingChange>> {
        match self.kind.as_str() {
            "customer.subscription.created"
            | "customer.subscription.updated"
            | "customer.subscription.deleted" => {
                let sub: Subscription = serde_json::from_value(self.data.object.clone())?;
                let deleted = self.kind == "customer.subscription.deleted";
                let status = if deleted {
                    SubscriptionStatus::Canceled
                } else {
                    SubscriptionStatus::from_stripe(&sub.status)
                };
                let plan = if deleted {
                    Some(Plan::Free)
                } else {
                    sub.price_id().and_then(|p| prices.plan_for(p))
                };

                Ok(Some(BillingChange {
                    customer_id: sub.customer,
                    subscription_id: Some(sub.id),
                    organization_id: None,
                    status,
                    plan,
                }))
            }
            "checkout.session.completed" => {
                let object = &self.data.object;
                let customer_id = match object["customer"].as_str() {
                    Some(c) => c.to_string(),
                    None => return Ok(None),
                };

                Ok(Some(BillingChange {
                    customer_id,
                    subscription_id: object["subscription"].as_str().map(str::to_string),
                    organization_id: object["client_reference_id"].as_str().map(str::to_string),
                    status: SubscriptionStatus::Active,
                    plan: None,
                }))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::serve;
    use axum::extract::Form;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    const SECRET: &str = "whsec_test";

    #[test]
    fn valid_signature_passes() {
        let payload = r#"{"id":"evt_1"}"#;
        let header = sign_webhook(payload, SECRET, 1_700_000_000);
        assert!(verify_webhook(payload, &header, SECRET, 300, 1_700_000_100).is_ok());
    }

    #[test]
    fn tampered_or_stale_signatures_fail() {
        let payload = r#"{"id":"evt_1"}"#;
        let header = sign_webhook(payload, SECRET, 1_700_000_000);

        assert!(verify_webhook(r#"{"id":"evt_2"}"#, &header, SECRET, 300, 1_700_000_000).is_err());
        assert!(verify_webhook(payload, &header, "other", 300, 1_700_000_000).is_err());
        assert!(verify_webhook(payload, &header, SECRET, 300, 1_700_001_000).is_err());
        assert!(verify_webhook(payload, "v1=abcd", SECRET, 300, 1_700_000_000).is_err());
        assert!(verify_webhook(payload, "t=1700000000", SECRET, 300, 1_700_000_000).is_err());
    }

    #[test]
    fn extreme_timestamps_are_rejected() {
        let now = 1_700_000_000;
        for t in [i64::MIN, i64::MAX, -1, 0] {
            let header = format!("t={},v1=00", t);
            assert!(matches!(
                verify_webhook("{}", &header, SECRET, 300, now),
                Err(PropdeskError::Unauthorized(_))
            ));
        }
        // A correctly signed payload still fails when its timestamp overflows the skew.
        let header = sign_webhook("{}", SECRET, i64::MIN);
        assert!(verify_webhook("{}", &header, SECRET, 300, now).is_err());
        assert!(verify_webhook("{}", &header, SECRET, 300, i64::MAX).is_err());
    }

    #[test]
    fn any_matching_v1_is_accepted() {
        let payload = "{}";
        let good = sign_webhook(payload, SECRET, 10);
        let sig = good.split_once(",v1=").unwrap().1;
        let header = format!("t=10,v1=deadbeef,v1={}", sig);
        assert!(verify_webhook(payload, &header, SECRET, 300, 10).is_ok());
    }

    fn catalog() -> PriceCatalog {
        PriceCatalog {
            pro: Some("price_pro".into()),
            enterprise: Some("price_ent".into()),
        }
    }

    #[test]
    fn subscription_events_map_to_billing() {
        let event = WebhookEvent::parse(
            &json!({
                "id": "evt_1",
                "type": "customer.subscription.updated",
                "data": { "object": {
                    "id": "sub_1", "customer": "cus_1", "status": "past_due",
                    "items": { "data": [ { "price": { "id": "price_ent" } } ] }
                }}
            })
            .to_string(),
        )
        .unwrap();

        let change = event.billing_change(&catalog()).unwrap().unwrap();
        assert_eq!(change.customer_id, "cus_1");
        assert_eq!(change.status, SubscriptionStatus::PastDue);
        assert_eq!(change.plan, Some(Plan::Enterprise));

        let deleted = WebhookEvent::parse(
            &json!({
                "id": "evt_2",
                "type": "customer.subscription.deleted",
                "data": { "object": { "id": "sub_1", "customer": "cus_1", "status": "canceled" } }
            })
            .to_string(),
        )
        .unwrap();
        let change = deleted.billing_change(&catalog()).unwrap().unwrap();
        assert_eq!(change.plan, Some(Plan::Free));
        assert_eq!(change.status, SubscriptionStatus::Canceled);
    }

    #[test]
    fn checkout_and_unknown_events() {
        let checkout = WebhookEvent::parse(
            &json!({
                "id": "evt_3",
                "type": "checkout.session.completed",
                "data": { "object": {
                    "customer": "cus_9", "subscription": "sub_9", "client_reference_id": "org-1"
                }}
            })
            .to_string(),
        )
        .unwrap();
        let change = checkout.billing_change(&catalog()).unwrap().unwrap();
        assert_eq!(change.organization_id.as_deref(), Some("org-1"));
        assert_eq!(change.subscription_id.as_deref(), Some("sub_9"));

        let other = WebhookEvent::parse(
            &json!({ "id": "evt_4", "type": "invoice.paid", "data": { "object": {} } }).to_string(),
        )
        .unwrap();
        assert!(other.billing_change(&catalog()).unwrap().is_none());
        assert!(WebhookEvent::parse("not json").is_err());
    }

    #[tokio::test]
    async fn client_sends_form_requests() {
        let base = serve(
            Router::new()
                .route(
                    "/v1/checkout/sessions",
                    post(|Form(form): Form<HashMap<String, String>>| async move {
                        assert_eq!(form["mode"], "subscription");
                        assert_eq!(form["line_items[0][price]"], "price_pro");
                        Json(json!({ "id": "cs_1", "url": "https://checkout.test/cs_1" }))
                    }),
                )
                .route(
                    "/v1/subscriptions/{id}",
                    get(|axum::extract::Path(id): axum::extract::Path<String>| async move {
                        Json(json!({ "id": id, "customer": "cus_1", "status": "active" }))
                    }),
                ),
        )
        .await;

        let client = StripeClient::new(&base, SecretString::from("sk_test")).unwrap();
        let session = client
            .create_checkout_session("cus_1", "price_pro", "org-1", "https://a/ok", "https://a/no")
            .await
            .unwrap();
        assert_eq!(session.url.as_deref(), Some("https://checkout.test/cs_1"));

        let sub = client.get_subscription("sub_7").await.unwrap();
        assert_eq!(sub.id, "sub_7");
        assert_eq!(sub.price_id(), None);
    }

    #[test]
    fn catalog_lookups() {
        let c = catalog();
        assert_eq!(c.price_for(Plan::Pro), Some("price_pro"));
        assert_eq!(c.price_for(Plan::Free), None);
        assert_eq!(c.plan_for("price_ent"), Some(Plan::Enterprise));
        assert_eq!(c.plan_for("price_x"), None);
    }
}
