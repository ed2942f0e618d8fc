//! Orchestrator-side registry client
//!
//! Discovery over the registry HTTP surface: list and fetch deployments,
//! select by metadata filters (dotted paths, globs, list containment),
//! and narrow to recently-heartbeating workers independent of TTL.

use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::filters::matches_filters;
use crate::registry::{DeploymentInfo, RegistryError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for orchestrators talking to the registry.
pub struct OrchestratorClient {
    registry_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl OrchestratorClient {
    pub fn new(registry_url: impl Into<String>) -> Self {
        Self::with_timeout(registry_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(registry_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds");
        Self {
            registry_url: registry_url.into().trim_end_matches('/').to_string(),
            auth_token: None,
            client,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// List deployments, optionally including expired leases and
    /// optionally filtered by metadata.
    pub async fn list_deployments(
        &self,
        include_dead: bool,
        filters: Option<&Map<String, Value>>,
    ) -> Result<Vec<DeploymentInfo>, RegistryError> {
        let mut url = format!("{}/deployments", self.registry_url);
        if include_dead {
            url.push_str("?include_dead=true");
        }

        let response = self.request(self.client.get(&url)).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(RegistryError::Status { status, detail });
        }

        let mut deployments: Vec<DeploymentInfo> = response.json().await?;
        if let Some(filters) = filters {
            deployments.retain(|d| {
                d.metadata
                    .as_ref()
                    .map(|m| matches_filters(m, filters))
                    .unwrap_or(false)
            });
        }
        debug!(count = deployments.len(), "Listed deployments");
        Ok(deployments)
    }

    /// Fetch one deployment; `None` when the registry answers 404.
    pub async fn get_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<Option<DeploymentInfo>, RegistryError> {
        let url = format!("{}/deployments/{}", self.registry_url, deployment_id);
        let response = self.request(self.client.get(&url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(RegistryError::Status { status, detail });
        }
        Ok(Some(response.json().await?))
    }

    /// Live deployments whose metadata satisfies every filter.
    pub async fn query_by_metadata(
        &self,
        filters: &Map<String, Value>,
    ) -> Result<Vec<DeploymentInfo>, RegistryError> {
        self.list_deployments(false, Some(filters)).await
    }

    /// Deployments whose last heartbeat is within `cutoff_seconds`,
    /// regardless of their declared TTL.
    pub async fn get_active(
        &self,
        cutoff_seconds: i64,
    ) -> Result<Vec<DeploymentInfo>, RegistryError> {
        let cutoff = Utc::now() - chrono::Duration::seconds(cutoff_seconds);
        let all = self.list_deployments(true, None).await?;
        let active: Vec<DeploymentInfo> = all
            .into_iter()
            .filter(|d| d.last_heartbeat >= cutoff)
            .collect();
        if active.is_empty() {
            warn!(cutoff_seconds, "No active deployments within cutoff");
        }
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn info(id: &str, heartbeat_offset_secs: i64, metadata: Value) -> Value {
        json!({
            "deployment_id": id,
            "deployment_name": format!("{}-name", id),
            "host": "worker",
            "port": 8000,
            "workflow_name": null,
            "is_alive": true,
            "last_heartbeat": (Utc::now() - chrono::Duration::seconds(heartbeat_offset_secs)).to_rfc3339(),
            "registered_at": Utc::now().to_rfc3339(),
            "ttl_seconds": 3600,
            "metadata": metadata,
        })
    }

    #[tokio::test]
    async fn test_list_with_metadata_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/deployments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                info("llm-1", 0, json!({"type": "llm", "model": "gpt-4o"})),
                info("vision-1", 0, json!({"type": "vision"})),
            ])))
            .mount(&server)
            .await;

        let client = OrchestratorClient::new(server.uri());
        let filters = json!({"model": "gpt-*"});
        let matched = client
            .query_by_metadata(filters.as_object().unwrap())
            .await
            .unwrap();

        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].deployment_id, "llm-1");
    }

    #[tokio::test]
    async fn test_get_deployment_404_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/deployments/ghost"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "nope"})))
            .mount(&server)
            .await;

        let client = OrchestratorClient::new(server.uri());
        assert!(client.get_deployment("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_active_ignores_ttl() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/deployments"))
            .and(query_param("include_dead", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                info("fresh", 10, json!({})),
                info("stale", 600, json!({})),
            ])))
            .mount(&server)
            .await;

        let client = OrchestratorClient::new(server.uri());
        let active = client.get_active(60).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].deployment_id, "fresh");
    }

    #[tokio::test]
    async fn test_server_error_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/deployments"))
            .respond_with(ResponseTemplate::new(500).set_body_string("db down"))
            .mount(&server)
            .await;

        let client = OrchestratorClient::new(server.uri());
        let err = client.list_deployments(false, None).await.unwrap_err();
        match err {
            RegistryError::Status { status, detail } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(detail, "db down");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
