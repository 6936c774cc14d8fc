//! Transactional email.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use propdesk_core::config::EmailConfig;
use propdesk_core::Result;

use crate::http::{build_client, ensure_success, join, request_err};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<()>;
}

/// Resend when an API key is configured, otherwise a mailer that only logs.
pub fn mailer_from_config(config: &EmailConfig) -> Result<Arc<dyn Mailer>> {
    match &config.resend_api_key {
        Some(key) => Ok(Arc::new(ResendMailer::new(
            &config.api_base,
            key.clone(),
            &config.from,
        )?)),
        None => {
            info!("no email API key configured; outgoing email will only be logged");
            Ok(Arc::new(LogMailer))
        }
    }
}

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct ResendResponse {
    id: String,
}

pub struct ResendMailer {
    client: Client,
    api_base: String,
    api_key: SecretString,
    from: String,
}

impl ResendMailer {
    pub fn new(api_base: &str, api_key: SecretString, from: &str) -> Result<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(15))?,
            api_base: api_base.to_string(),
            api_key,
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, message: EmailMessage) -> Result<()> {
        let body = ResendRequest {
            from: &self.from,
            to: [&message.to],
            subject: &message.subject,
            html: &message.html,
            text: &message.text,
        };

        let response = self
            .client
            .post(join(&self.api_base, "emails"))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| request_err("resend", e))?;
        let sent: ResendResponse = ensure_success("resend", response)
            .await?
            .json()
            .await
            .map_err(|e| request_err("resend", e))?;

        debug!(email_id = %sent.id, subject = %message.subject, "email sent");
        Ok(())
    }
}

/// Writes messages to the log instead of delivering them.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: EmailMessage) -> Result<()> {
        info!(to = %message.to, subject = %message.subject, body = %message.text, "email (not sent)");
        Ok(())
    }
}

/// Keeps sent messages in memory for assertions.
#[cfg(any(test, feature = "test_utils"))]
#[derive(Default)]
pub struct MemoryMailer {
    sent: parking_lot::Mutex<Vec<EmailMessage>>,
}

#[cfg(any(test, feature = "test_utils"))]
impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().clone()
    }

    /// The most recent message addressed to `to`.
    pub fn last_to(&self, to: &str) -> Option<EmailMessage> {
        self.sent.lock().iter().rev().find(|m| m.to == to).cloned()
    }
}

#[cfg(any(test, feature = "test_utils"))]
#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, message: EmailMessage) -> Result<()> {
        self.sent.lock().push(message);
        Ok(())
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn invitation_email(
    to: &str,
    organization_name: &str,
    inviter_name: &str,
    accept_url: &str,
) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: format!("You're invited to join {} on Propdesk", organization_name),
        html: format!(
            "<p>{} invited you to join <strong>{}</strong> on Propdesk.</p>\
             <p><a href=\"{}\">Accept the invitation</a></p>",
            escape_html(inviter_name),
            escape_html(organization_name),
            escape_html(accept_url),
        ),
        text: format!(
            "{} invited you to join {} on Propdesk.\n\nAccept the invitation: {}\n",
            inviter_name, organization_name, accept_url
        ),
    }
}

pub fn password_reset_email(to: &str, reset_url: &str, valid_minutes: i64) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: "Reset your Propdesk password".to_string(),
        html: format!(
            "<p>Someone asked to reset the password for this account.</p>\
             <p><a href=\"{}\">Choose a new password</a></p>\
             <p>The link works for {} minutes. If this wasn't you, ignore this email.</p>",
            escape_html(reset_url),
            valid_minutes
        ),
        text: format!(
            "Someone asked to reset the password for this account.\n\n\
             Choose a new password: {}\n\nThe link works for {} minutes. \
             If this wasn't you, ignore this email.\n",
            reset_url, valid_minutes
        ),
    }
}

pub fn two_factor_enabled_email(to: &str, full_name: &str) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: "Two-factor authentication is on".to_string(),
        html: format!(
            "<p>Hi {},</p><p>Two-factor authentication is now enabled for your Propdesk account.</p>",
            escape_html(full_name)
        ),
        text: format!(
            "Hi {},\n\nTwo-factor authentication is now enabled for your Propdesk account.\n",
            full_name
        ),
    }
}
