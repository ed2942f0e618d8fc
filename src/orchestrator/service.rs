//! Orchestrator service
//!
//! Owns an in-memory connection table over registry-discovered workers,
//! health-checks them against the registry, and dispatches workflow
//! executions: single calls, or a fan-out bounded by a worker pool with a
//! per-call wall-clock timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::client::OrchestratorClient;
use crate::registry::RegistryError;

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub orchestrator_id: String,
    /// Worker pool bound for `execute_parallel`
    pub max_parallel_executions: usize,
    /// Per-call wall-clock timeout
    pub execution_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            orchestrator_id: format!("orchestrator-{}", Uuid::new_v4()),
            max_parallel_executions: 5,
            execution_timeout: Duration::from_secs(300),
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// A tracked connection to one deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub deployment_id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub status: ConnectionStatus,
    pub connected_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub metadata: Option<Value>,
}

/// Errors from orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("No connection to deployment '{0}'")]
    NotConnected(String),

    #[error("Deployment '{0}' is unhealthy")]
    Unhealthy(String),

    #[error("Deployment '{0}' not found in registry")]
    UnknownDeployment(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Execution request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Terminal status of one fan-out call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Timeout,
    Error,
}

/// Result of one execute-on-deployment call within a fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub deployment_id: String,
    pub status: OutcomeStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// The orchestrator: discovery, connections, and dispatch.
pub struct OrchestratorService {
    client: OrchestratorClient,
    config: OrchestratorConfig,
    connections: Mutex<HashMap<String, Connection>>,
    http: reqwest::Client,
}

impl OrchestratorService {
    pub fn new(client: OrchestratorClient, config: OrchestratorConfig) -> Self {
        // No client-level timeout here: the per-call wall clock is
        // enforced by `execute_parallel` so a slow call reports `timeout`
        // rather than a transport error.
        let http = reqwest::Client::new();
        Self {
            client,
            config,
            connections: Mutex::new(HashMap::new()),
            http,
        }
    }

    /// Discover deployments from the registry; failures log and return
    /// an empty list rather than propagating.
    pub async fn discover(&self, include_dead: bool) -> Vec<crate::registry::DeploymentInfo> {
        match self.client.list_deployments(include_dead, None).await {
            Ok(deployments) => {
                info!(count = deployments.len(), "Discovered deployments");
                deployments
            }
            Err(e) => {
                warn!(error = %e, "Deployment discovery failed");
                Vec::new()
            }
        }
    }

    /// Record a connection to a registry-known deployment.
    pub async fn register(&self, deployment_id: &str) -> Result<Connection, OrchestratorError> {
        let info = self
            .client
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| OrchestratorError::UnknownDeployment(deployment_id.to_string()))?;

        let connection = Connection {
            deployment_id: deployment_id.to_string(),
            name: info.deployment_name,
            host: info.host,
            port: info.port,
            status: ConnectionStatus::Connected,
            connected_at: Utc::now(),
            disconnected_at: None,
            metadata: info.metadata,
        };

        self.connections
            .lock()
            .await
            .insert(deployment_id.to_string(), connection.clone());
        info!(deployment_id, "Connection registered");
        Ok(connection)
    }

    /// Drop a connection; returns whether one existed.
    pub async fn deregister(&self, deployment_id: &str) -> bool {
        let removed = self.connections.lock().await.remove(deployment_id);
        if removed.is_some() {
            info!(deployment_id, "Connection deregistered");
        }
        removed.is_some()
    }

    pub async fn get_connection(&self, deployment_id: &str) -> Option<Connection> {
        self.connections.lock().await.get(deployment_id).cloned()
    }

    pub async fn list_connections(&self) -> Vec<Connection> {
        self.connections.lock().await.values().cloned().collect()
    }

    /// A connection is healthy while the deployment is still present and
    /// alive in the registry.
    pub async fn check_health(&self, deployment_id: &str) -> bool {
        if !self.connections.lock().await.contains_key(deployment_id) {
            return false;
        }
        match self.client.get_deployment(deployment_id).await {
            Ok(Some(info)) => {
                if !info.is_alive {
                    warn!(deployment_id, "Deployment heartbeat expired");
                }
                info.is_alive
            }
            Ok(None) => {
                warn!(deployment_id, "Deployment no longer in registry");
                false
            }
            Err(e) => {
                warn!(deployment_id, error = %e, "Health check failed");
                false
            }
        }
    }

    /// Connected deployments that fail the health check.
    pub async fn unhealthy(&self) -> Vec<String> {
        let ids: Vec<String> = self.connections.lock().await.keys().cloned().collect();
        let mut unhealthy = Vec::new();
        for id in ids {
            if !self.check_health(&id).await {
                unhealthy.push(id);
            }
        }
        unhealthy
    }

    /// Execute a workflow on one connected, healthy deployment.
    pub async fn execute_on(
        &self,
        deployment_id: &str,
        workflow_name: &str,
        inputs: &Value,
    ) -> Result<Value, OrchestratorError> {
        let connection = self
            .get_connection(deployment_id)
            .await
            .ok_or_else(|| OrchestratorError::NotConnected(deployment_id.to_string()))?;

        if !self.check_health(deployment_id).await {
            return Err(OrchestratorError::Unhealthy(deployment_id.to_string()));
        }

        let url = format!("http://{}:{}/execute", connection.host, connection.port);
        debug!(deployment_id, workflow = workflow_name, %url, "Dispatching execution");

        let response = self
            .http
            .post(&url)
            .json(&json!({
                "workflow_name": workflow_name,
                "inputs": inputs,
            }))
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    /// Execute a workflow on many deployments concurrently.
    ///
    /// Concurrency is bounded by `max_parallel_executions`; each call is
    /// awaited with `execution_timeout`. Always yields one outcome per
    /// requested id, order not guaranteed.
    pub async fn execute_parallel(
        &self,
        deployment_ids: &[String],
        workflow_name: &str,
        inputs: &Value,
    ) -> Vec<ExecutionOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_executions));
        let timeout = self.config.execution_timeout;

        join_all(deployment_ids.iter().map(|id| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore open");
                let outcome =
                    tokio::time::timeout(timeout, self.execute_on(id, workflow_name, inputs)).await;
                match outcome {
                    Ok(Ok(result)) => ExecutionOutcome {
                        deployment_id: id.clone(),
                        status: OutcomeStatus::Completed,
                        result: Some(result),
                        error: None,
                        timestamp: Utc::now(),
                    },
                    Ok(Err(e)) => {
                        warn!(deployment_id = %id, error = %e, "Fan-out execution failed");
                        ExecutionOutcome {
                            deployment_id: id.clone(),
                            status: OutcomeStatus::Error,
                            result: None,
                            error: Some(e.to_string()),
                            timestamp: Utc::now(),
                        }
                    }
                    Err(_) => {
                        warn!(deployment_id = %id, "Fan-out execution timed out");
                        ExecutionOutcome {
                            deployment_id: id.clone(),
                            status: OutcomeStatus::Timeout,
                            result: None,
                            error: Some("Execution timeout".into()),
                            timestamp: Utc::now(),
                        }
                    }
                }
            }
        }))
        .await
    }

    /// Status summary for monitoring.
    pub async fn get_status(&self) -> Value {
        let connections = self.list_connections().await;
        let unhealthy = self.unhealthy().await;
        json!({
            "orchestrator_id": self.config.orchestrator_id,
            "total_connections": connections.len(),
            "connected": connections.len().saturating_sub(unhealthy.len()),
            "unhealthy": unhealthy,
            "timestamp": Utc::now(),
        })
    }
}
