//! Search indexing. Documents are pushed to MeiliSearch when it is
//! configured; callers treat indexing as best effort.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, info};

use propdesk_core::config::SearchConfig;
use propdesk_core::Result;

use crate::http::{build_client, ensure_success, join, request_err};

pub const ENTITIES_INDEX: &str = "entities";
pub const LEASES_INDEX: &str = "leases";

#[async_trait]
pub trait SearchIndexer: Send + Sync {
    /// Adds or replaces `document`, keyed by its `id` field.
    async fn index(&self, index: &str, document: Value) -> Result<()>;

    async fn remove(&self, index: &str, id: &str) -> Result<()>;
}

pub fn search_from_config(config: &SearchConfig) -> Result<Arc<dyn SearchIndexer>> {
    match &config.url {
        Some(url) => Ok(Arc::new(MeiliSearchIndexer::new(
            url,
            config.api_key.clone(),
            &config.index_prefix,
        )?)),
        None => {
            info!("search indexing disabled");
            Ok(Arc::new(NoopIndexer))
        }
    }
}

pub struct MeiliSearchIndexer {
    client: Client,
    url: String,
    api_key: Option<SecretString>,
    prefix: String,
}

impl MeiliSearchIndexer {
    pub fn new(url: &str, api_key: Option<SecretString>, prefix: &str) -> Result<Self> {
        Ok(Self {
            client: build_client(Duration::from_secs(10))?,
            url: url.to_string(),
            api_key,
            prefix: prefix.to_string(),
        })
    }

    fn index_name(&self, index: &str) -> String {
        format!("{}{}", self.prefix, index)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }
}

#[async_trait]
impl SearchIndexer for MeiliSearchIndexer {
    async fn index(&self, index: &str, document: Value) -> Result<()> {
        let path = format!("indexes/{}/documents?primaryKey=id", self.index_name(index));
        let request = self
            .client
            .put(join(&self.url, &path))
            .json(&[document]);

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| request_err("meilisearch", e))?;
        ensure_success("meilisearch", response).await?;
        debug!(index, "document queued for indexing");
        Ok(())
    }

    async fn remove(&self, index: &str, id: &str) -> Result<()> {
        let path = format!("indexes/{}/documents/{}", self.index_name(index), id);
        let response = self
            .authorize(self.client.delete(join(&self.url, &path)))
            .send()
            .await
            .map_err(|e| request_err("meilisearch", e))?;
        ensure_success("meilisearch", response).await?;
        Ok(())
    }
}

pub struct NoopIndexer;

#[async_trait]
impl SearchIndexer for NoopIndexer {
    async fn index(&self, _index: &str, _document: Value) -> Result<()> {
        Ok(())
    }

    async fn remove(&self, _index: &str, _id: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::serve;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::{delete, put};
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use serde_json::json;

    type Log = Arc<Mutex<Vec<String>>>;

    #[tokio::test]
    async fn meilisearch_put_and_delete() {
        let log: Log = Arc::default();
        let base = serve(
            Router::new()
                .route(
                    "/indexes/{index}/documents",
                    put(
                        |State(log): State<Log>,
                         Path(index): Path<String>,
                         Json(docs): Json<Vec<Value>>| async move {
                            log.lock().push(format!("put {} {}", index, docs[0]["id"]));
                            (StatusCode::ACCEPTED, Json(json!({ "taskUid": 1 })))
                        },
                    ),
                )
                .route(
                    "/indexes/{index}/documents/{id}",
                    delete(
                        |State(log): State<Log>, Path((index, id)): Path<(String, String)>| async move {
                            log.lock().push(format!("delete {} {}", index, id));
                            (StatusCode::ACCEPTED, Json(json!({ "taskUid": 2 })))
                        },
                    ),
                )
                .with_state(log.clone()),
        )
        .await;

        let indexer = MeiliSearchIndexer::new(&base, None, "test_").unwrap();
        indexer
            .index(LEASES_INDEX, json!({ "id": "l1", "tenant_name": "Kim" }))
            .await
            .unwrap();
        indexer.remove(LEASES_INDEX, "l1").await.unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "put test_leases \"l1\"".to_string(),
                "delete test_leases l1".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn unconfigured_search_is_noop() {
        let indexer = search_from_config(&SearchConfig {
            url: None,
            api_key: None,
            index_prefix: String::new(),
        })
        .unwrap();
        indexer.index(ENTITIES_INDEX, json!({ "id": "x" })).await.unwrap();
        indexer.remove(ENTITIES_INDEX, "x").await.unwrap();
    }
}
