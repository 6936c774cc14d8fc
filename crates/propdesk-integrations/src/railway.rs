//! Read-only access to Railway's GraphQL API for deployment status.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use propdesk_core::config::RailwayConfig;
use propdesk_core::{PropdeskError, Result};

use crate::http::{build_client, ensure_success, request_err};

const DEPLOYMENTS_QUERY: &str = r#"
query Deployments($first: Int!, $input: DeploymentListInput!) {
  deployments(first: $first, input: $input) {
    edges { node { id status createdAt staticUrl } }
  }
}"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub url: Option<String>,
}

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
struct DeploymentsData {
    deployments: Connection,
}

#[derive(Deserialize)]
struct Connection {
    edges: Vec<Edge>,
}

#[derive(Deserialize)]
struct Edge {
    node: DeploymentNode,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentNode {
    id: String,
    status: String,
    created_at: DateTime<Utc>,
    static_url: Option<String>,
}

impl From<DeploymentNode> for Deployment {
    fn from(node: DeploymentNode) -> Self {
        Deployment {
            id: node.id,
            status: node.status,
            created_at: node.created_at,
            url: node.static_url.map(|u| {
                if u.starts_with("http") {
                    u
                } else {
                    format!("https://{}", u)
                }
            }),
        }
    }
}

pub struct RailwayClient {
    client: Client,
    endpoint: String,
    token: SecretString,
    project_id: Option<String>,
    environment_id: Option<String>,
    service_id: Option<String>,
}

impl RailwayClient {
    pub fn new(endpoint: &str, token: SecretString) -> Result<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(15))?,
            endpoint: endpoint.to_string(),
            token,
            project_id: None,
            environment_id: None,
            service_id: None,
        })
    }

    /// `None` when no API token is configured.
    pub fn from_config(config: &RailwayConfig) -> Result<Option<Self>> {
        let Some(token) = &config.api_token else {
            return Ok(None);
        };
        let mut client = Self::new(&config.endpoint, token.clone())?;
        client.project_id = config.project_id.clone();
        client.environment_id = config.environment_id.clone();
        client.service_id = config.service_id.clone();
        Ok(Some(client))
    }

    /// Runs a GraphQL query. Errors reported by the API become
    /// integration errors even when the HTTP status is 200.
    pub async fn query<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.token.expose_secret())
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| request_err("railway", e))?;

        let body: GraphQlResponse<T> = ensure_success("railway", response)
            .await?
            .json()
            .await
            .map_err(|e| request_err("railway", e))?;

        if !body.errors.is_empty() {
            let messages: Vec<_> = body.errors.into_iter().map(|e| e.message).collect();
            return Err(PropdeskError::Integration(format!(
                "railway: {}",
                messages.join("; ")
            )));
        }
        body.data
            .ok_or_else(|| PropdeskError::Integration("railway returned no data".into()))
    }

    pub async fn latest_deployments(&self, limit: usize) -> Result<Vec<Deployment>> {
        let mut input = serde_json::Map::new();
        for (key, value) in [
            ("projectId", &self.project_id),
            ("environmentId", &self.environment_id),
            ("serviceId", &self.service_id),
        ] {
            if let Some(value) = value {
                input.insert(key.to_string(), Value::String(value.clone()));
            }
        }

        let data: DeploymentsData = self
            .query(
                DEPLOYMENTS_QUERY,
                json!({ "first": limit, "input": Value::Object(input) }),
            )
            .await?;

        Ok(data
            .deployments
            .edges
            .into_iter()
            .map(|edge| edge.node.into())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::serve;
    use axum::routing::post;
    use axum::{Json, Router};

    #[tokio::test]
    async fn lists_deployments() {
        let base = serve(Router::new().route(
            "/graphql",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["variables"]["first"], 2);
                assert_eq!(body["variables"]["input"]["projectId"], "proj");
                Json(json!({ "data": { "deployments": { "edges": [
                    { "node": { "id": "d1", "status": "SUCCESS",
                                "createdAt": "2026-03-01T10:00:00Z",
                                "staticUrl": "propdesk.up.railway.app" } },
                    { "node": { "id": "d0", "status": "FAILED",
                                "createdAt": "2026-02-28T10:00:00Z",
                                "staticUrl": null } }
                ] } } }))
            }),
        ))
        .await;

        let client = RailwayClient::from_config(&RailwayConfig {
            api_token: Some(SecretString::from("tok")),
            endpoint: format!("{}/graphql", base),
            project_id: Some("proj".into()),
            environment_id: None,
            service_id: None,
        })
        .unwrap()
        .unwrap();

        let deployments = client.latest_deployments(2).await.unwrap();
        assert_eq!(deployments.len(), 2);
        assert_eq!(
            deployments[0].url.as_deref(),
            Some("https://propdesk.up.railway.app")
        );
        assert_eq!(deployments[1].url, None);
    }

    #[tokio::test]
    async fn graphql_errors_surface() {
        let base = serve(Router::new().route(
            "/graphql",
            post(|| async {
                Json(json!({ "data": null, "errors": [ { "message": "Not Authorized" } ] }))
            }),
        ))
        .await;

        let client = RailwayClient::new(&format!("{}/graphql", base), SecretString::from("t")).unwrap();
        let err = client.latest_deployments(5).await.unwrap_err();
        assert!(err.to_string().contains("Not Authorized"));
    }

    #[test]
    fn unconfigured_is_none() {
        let config = RailwayConfig {
            api_token: None,
            endpoint: "https://backboard.railway.app/graphql/v2".into(),
            project_id: None,
            environment_id: None,
            service_id: None,
        };
        assert!(RailwayClient::from_config(&config).unwrap().is_none());
    }
}
