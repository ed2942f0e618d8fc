//! Registry client for workers
//!
//! A long-lived worker registers itself once, then refreshes its lease on
//! a periodic heartbeat until deregistration. Heartbeat failures are
//! logged and retried at the next tick; they never kill the loop.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_TTL_SECONDS: u64 = 60;
const DEFAULT_HEARTBEAT_INTERVAL: u64 = 20;
const DEFAULT_PORT: u16 = 8000;
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from registry client calls.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Registry returned {status}: {detail}")]
    Status { status: StatusCode, detail: String },

    #[error("Invalid registry client configuration: {0}")]
    Config(String),
}

/// Worker-side registry client.
#[derive(Debug)]
pub struct RegistryClient {
    registry_url: String,
    deployment_id: String,
    deployment_name: String,
    ttl_seconds: u64,
    heartbeat_interval: u64,
    workflow_name: Option<String>,
    client: reqwest::Client,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl RegistryClient {
    /// Create a client.
    ///
    /// `heartbeat_interval` must be strictly less than `ttl_seconds`, or
    /// the lease would expire between beats.
    pub fn new(
        registry_url: impl Into<String>,
        deployment_id: impl Into<String>,
        deployment_name: impl Into<String>,
        ttl_seconds: u64,
        heartbeat_interval: u64,
    ) -> Result<Self, RegistryError> {
        if heartbeat_interval >= ttl_seconds {
            return Err(RegistryError::Config(format!(
                "heartbeat_interval ({}) must be less than ttl_seconds ({})",
                heartbeat_interval, ttl_seconds
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(RegistryError::Http)?;
        Ok(Self {
            registry_url: registry_url.into().trim_end_matches('/').to_string(),
            deployment_id: deployment_id.into(),
            deployment_name: deployment_name.into(),
            ttl_seconds,
            heartbeat_interval,
            workflow_name: None,
            client,
            heartbeat_task: Mutex::new(None),
        })
    }

    /// Client with the default lease (60 s TTL, 20 s heartbeat).
    pub fn with_defaults(
        registry_url: impl Into<String>,
        deployment_id: impl Into<String>,
        deployment_name: impl Into<String>,
    ) -> Self {
        Self::new(
            registry_url,
            deployment_id,
            deployment_name,
            DEFAULT_TTL_SECONDS,
            DEFAULT_HEARTBEAT_INTERVAL,
        )
        .expect("default lease parameters are valid")
    }

    pub fn with_workflow_name(mut self, workflow_name: impl Into<String>) -> Self {
        self.workflow_name = Some(workflow_name.into());
        self
    }

    pub fn registry_url(&self) -> &str {
        &self.registry_url
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    /// Host/port for the registration, resolved in order: `AGENT_HOST` /
    /// `AGENT_PORT` env vars, then `host`/`port` keys in the metadata,
    /// then the detected hostname with the default port.
    fn resolve_host_port(&self, metadata: &Value) -> (String, u16) {
        let host = std::env::var("AGENT_HOST")
            .ok()
            .filter(|h| !h.is_empty())
            .or_else(|| {
                metadata
                    .get("host")
                    .and_then(|v| v.as_str())
                    .map(String::from)
            })
            .unwrap_or_else(|| {
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| "localhost".to_string())
            });

        let port = std::env::var("AGENT_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .or_else(|| {
                metadata.get("port").and_then(|v| match v {
                    Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
                    Value::String(s) => s.parse().ok(),
                    _ => None,
                })
            })
            .unwrap_or(DEFAULT_PORT);

        (host, port)
    }

    /// Register this worker with the registry.
    pub async fn register(&self, metadata: Value) -> Result<Value, RegistryError> {
        let (host, port) = self.resolve_host_port(&metadata);
        let body = json!({
            "deployment_id": self.deployment_id,
            "deployment_name": self.deployment_name,
            "host": host,
            "port": port,
            "ttl_seconds": self.ttl_seconds,
            "workflow_name": self.workflow_name,
            "metadata": metadata,
        });

        let response = self
            .client
            .post(format!("{}/deployments/register", self.registry_url))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(RegistryError::Status { status, detail });
        }

        info!(
            deployment_id = %self.deployment_id,
            host = %host,
            port,
            "Registered with deployment registry"
        );
        Ok(response.json().await?)
    }

    /// Start the periodic heartbeat loop.
    ///
    /// Transient failures are logged and retried at the next tick. The
    /// loop runs until [`deregister`](Self::deregister) cancels it.
    pub async fn start_heartbeat_loop(&self) {
        let url = format!(
            "{}/deployments/{}/heartbeat",
            self.registry_url, self.deployment_id
        );
        let client = self.client.clone();
        let deployment_id = self.deployment_id.clone();
        let interval = Duration::from_secs(self.heartbeat_interval);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match client.post(&url).send().await {
                    Ok(response) if response.status().is_success() => {
                        debug!(deployment_id = %deployment_id, "Heartbeat sent");
                    }
                    Ok(response) => {
                        warn!(
                            deployment_id = %deployment_id,
                            status = %response.status(),
                            "Heartbeat rejected"
                        );
                    }
                    Err(e) => {
                        warn!(deployment_id = %deployment_id, error = %e, "Heartbeat failed");
                    }
                }
            }
        });

        let mut slot = self.heartbeat_task.lock().await;
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    /// Stop the heartbeat loop and remove the lease, best-effort: delete
    /// failures are swallowed.
    pub async fn deregister(&self) {
        if let Some(task) = self.heartbeat_task.lock().await.take() {
            task.abort();
        }

        let url = format!("{}/deployments/{}", self.registry_url, self.deployment_id);
        match self.client.delete(&url).send().await {
            Ok(response) if response.status().is_success() => {
                info!(deployment_id = %self.deployment_id, "Deregistered from registry");
            }
            Ok(response) => {
                warn!(
                    deployment_id = %self.deployment_id,
                    status = %response.status(),
                    "Deregister rejected"
                );
            }
            Err(e) => {
                warn!(deployment_id = %self.deployment_id, error = %e, "Deregister failed");
            }
        }
    }
}
