//! Shared HTTP plumbing for the outbound clients.

use std::time::Duration;

use reqwest::{Client, ClientBuilder, Response};
use tracing::warn;

use propdesk_core::{PropdeskError, Result};

pub const USER_AGENT: &str = concat!("propdesk/", env!("CARGO_PKG_VERSION"));

/// Builds the client every integration uses: bounded timeouts and a small
/// idle pool, since each service sees low request volume.
pub fn build_client(timeout: Duration) -> Result<Client> {
    ClientBuilder::new()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(90))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| PropdeskError::Integration(format!("failed to build HTTP client: {}", e)))
}

pub(crate) fn request_err(service: &str, err: reqwest::Error) -> PropdeskError {
    PropdeskError::Integration(format!("{} request failed: {}", service, err))
}

/// Turns a non-2xx response into an integration error carrying the body.
pub(crate) async fn ensure_success(service: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    warn!(service, status = status.as_u16(), "upstream returned an error");
    Err(PropdeskError::Integration(format!(
        "{} returned {}: {}",
        service,
        status,
        truncate(&body, 300)
    )))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Joins a configured base URL and a path without doubling slashes.
pub(crate) fn join(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Serves `router` on an ephemeral local port and returns its base URL.
    pub(crate) async fn serve(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn join_handles_slashes() {
        assert_eq!(join("https://a.test/", "/v1/x"), "https://a.test/v1/x");
        assert_eq!(join("https://a.test", "v1"), "https://a.test/v1");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
