//! Mobile push notifications through the Expo push service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use propdesk_core::config::PushConfig;
use propdesk_core::Result;

use crate::http::{build_client, ensure_success, join, request_err};

/// Expo accepts at most this many messages per request.
const EXPO_BATCH: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Sends `message` to every device token and returns how many were
    /// accepted.
    async fn send(&self, tokens: &[String], message: &PushMessage) -> Result<usize>;
}

pub fn push_from_config(config: &PushConfig) -> Result<Arc<dyn PushProvider>> {
    if config.enabled {
        Ok(Arc::new(ExpoPushProvider::new(
            &config.api_base,
            config.access_token.clone(),
        )?))
    } else {
        info!("push notifications disabled");
        Ok(Arc::new(NoopPush))
    }
}

#[derive(Serialize)]
struct ExpoMessage<'a> {
    to: &'a str,
    title: &'a str,
    body: &'a str,
    sound: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ExpoResponse {
    #[serde(default)]
    data: Vec<ExpoTicket>,
}

#[derive(Deserialize)]
struct ExpoTicket {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

pub struct ExpoPushProvider {
    client: Client,
    api_base: String,
    access_token: Option<SecretString>,
}

impl ExpoPushProvider {
    pub fn new(api_base: &str, access_token: Option<SecretString>) -> Result<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(15))?,
            api_base: api_base.to_string(),
            access_token,
        })
    }
}

#[async_trait]
impl PushProvider for ExpoPushProvider {
    async fn send(&self, tokens: &[String], message: &PushMessage) -> Result<usize> {
        let data = message
            .url
            .as_ref()
            .map(|url| serde_json::json!({ "url": url }));
        let mut delivered = 0;

        for batch in tokens.chunks(EXPO_BATCH) {
            let payload: Vec<ExpoMessage<'_>> = batch
                .iter()
                .map(|token| ExpoMessage {
                    to: token,
                    title: &message.title,
                    body: &message.body,
                    sound: "default",
                    data: data.clone(),
                })
                .collect();

            let mut request = self
                .client
                .post(join(&self.api_base, "--/api/v2/push/send"))
                .json(&payload);
            if let Some(token) = &self.access_token {
                request = request.bearer_auth(token.expose_secret());
            }

            let response = request.send().await.map_err(|e| request_err("expo", e))?;
            let tickets: ExpoResponse = ensure_success("expo", response)
                .await?
                .json()
                .await
                .map_err(|e| request_err("expo", e))?;

            for ticket in &tickets.data {
                if ticket.status == "ok" {
                    delivered += 1;
                } else {
                    warn!(
                        message = ticket.message.as_deref().unwrap_or("unknown"),
                        "push ticket rejected"
                    );
                }
            }
        }

        debug!(delivered, requested = tokens.len(), "push batch sent");
        Ok(delivered)
    }
}

pub struct NoopPush;

#[async_trait]
impl PushProvider for NoopPush {
    async fn send(&self, _tokens: &[String], _message: &PushMessage) -> Result<usize> {
        Ok(0)
    }
}

/// Records every push for assertions.
#[cfg(any(test, feature = "test_utils"))]
#[derive(Default)]
pub struct MemoryPush {
    sent: parking_lot::Mutex<Vec<(String, PushMessage)>>,
}

#[cfg(any(test, feature = "test_utils"))]
impl MemoryPush {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(device token, message)` pairs in send order.
    pub fn sent(&self) -> Vec<(String, PushMessage)> {
        self.sent.lock().clone()
    }
}

#[cfg(any(test, feature = "test_utils"))]
#[async_trait]
impl PushProvider for MemoryPush {
    async fn send(&self, tokens: &[String], message: &PushMessage) -> Result<usize> {
        let mut sent = self.sent.lock();
        for token in tokens {
            sent.push((token.clone(), message.clone()));
        }
        Ok(tokens.len())
    }
}
