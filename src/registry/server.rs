//! Deployment registry HTTP service
//!
//! Endpoints: register (idempotent upsert), heartbeat, list/get/delete,
//! and a health summary. A background sweeper deletes expired leases on a
//! fixed interval without ever touching the request path.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::storage::{DeploymentRecord, DeploymentRepository};

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_TTL_SECONDS: i64 = 60;

/// Registration request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub deployment_id: String,
    pub deployment_name: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: i64,
    #[serde(default)]
    pub workflow_name: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

fn default_ttl() -> i64 {
    DEFAULT_TTL_SECONDS
}

/// Lease representation returned by every read endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentInfo {
    pub deployment_id: String,
    pub deployment_name: String,
    pub host: String,
    pub port: u16,
    pub workflow_name: Option<String>,
    pub is_alive: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub ttl_seconds: i64,
    pub metadata: Option<Value>,
}

impl From<DeploymentRecord> for DeploymentInfo {
    fn from(record: DeploymentRecord) -> Self {
        let is_alive = record.is_alive();
        Self {
            deployment_id: record.deployment_id,
            deployment_name: record.deployment_name,
            host: record.host,
            port: record.port,
            workflow_name: record.workflow_name,
            is_alive,
            last_heartbeat: record.last_heartbeat,
            registered_at: record.registered_at,
            ttl_seconds: record.ttl_seconds,
            metadata: record.metadata,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    include_dead: bool,
}

#[derive(Clone)]
struct AppState {
    repo: Arc<dyn DeploymentRepository>,
}

/// The registry service: router plus background sweeper.
pub struct RegistryServer {
    repo: Arc<dyn DeploymentRepository>,
    sweep_interval: Duration,
}

impl RegistryServer {
    pub fn new(repo: Arc<dyn DeploymentRepository>) -> Self {
        Self {
            repo,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Build the axum router for the registry surface.
    pub fn router(&self) -> Router {
        let state = AppState {
            repo: Arc::clone(&self.repo),
        };
        Router::new()
            .route("/deployments/register", post(register))
            .route("/deployments/:id/heartbeat", post(heartbeat))
            .route("/deployments", get(list_deployments))
            .route("/deployments/:id", get(get_deployment))
            .route("/deployments/:id", delete(delete_deployment))
            .route("/health", get(health))
            .with_state(state)
    }

    /// Start the background sweeper. Missed ticks are tolerated; sweep
    /// failures are logged and never terminate the loop.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let repo = Arc::clone(&self.repo);
        let sweep_interval = self.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh server
            // doesn't sweep before anything can register.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match repo.delete_expired().await {
                    Ok(0) => {}
                    Ok(count) => info!(count, "Swept expired deployments"),
                    Err(e) => warn!(error = %e, "Deployment sweep failed"),
                }
            }
        })
    }

    /// Bind and serve, with the sweeper running alongside.
    pub async fn serve(self, addr: std::net::SocketAddr) -> std::io::Result<()> {
        let sweeper = self.spawn_sweeper();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "Deployment registry listening");
        let result = axum::serve(listener, self.router()).await;
        sweeper.abort();
        result
    }
}

fn storage_error(err: StorageError) -> Response {
    match err {
        StorageError::NotFound(detail) => {
            (StatusCode::NOT_FOUND, Json(json!({ "detail": detail }))).into_response()
        }
        other => {
            let correlation_id = uuid::Uuid::new_v4().to_string();
            warn!(error = %other, correlation_id = %correlation_id, "Registry storage error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "detail": other.to_string(),
                    "correlation_id": correlation_id,
                })),
            )
                .into_response()
        }
    }
}

async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Response {
    let now = Utc::now();
    let record = DeploymentRecord {
        deployment_id: request.deployment_id,
        deployment_name: request.deployment_name,
        host: request.host,
        port: request.port,
        workflow_name: request.workflow_name,
        metadata: request.metadata,
        ttl_seconds: request.ttl_seconds,
        last_heartbeat: now,
        registered_at: now,
    };

    match state.repo.upsert(record).await {
        Ok(stored) => {
            debug!(deployment_id = %stored.deployment_id, "Deployment registered");
            Json(DeploymentInfo::from(stored)).into_response()
        }
        Err(e) => storage_error(e),
    }
}

async fn heartbeat(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.repo.update_heartbeat(&id).await {
        Ok(last_heartbeat) => Json(json!({
            "status": "ok",
            "last_heartbeat": last_heartbeat,
        }))
        .into_response(),
        Err(e) => storage_error(e),
    }
}

async fn list_deployments(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Response {
    match state.repo.list_all(params.include_dead).await {
        Ok(records) => {
            let infos: Vec<DeploymentInfo> =
                records.into_iter().map(DeploymentInfo::from).collect();
            Json(infos).into_response()
        }
        Err(e) => storage_error(e),
    }
}

async fn get_deployment(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.repo.get(&id).await {
        Ok(Some(record)) => Json(DeploymentInfo::from(record)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": format!("Deployment not found: {}", id) })),
        )
            .into_response(),
        Err(e) => storage_error(e),
    }
}

async fn delete_deployment(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.repo.delete(&id).await {
        Ok(()) => Json(json!({ "status": "deleted", "deployment_id": id })).into_response(),
        Err(e) => storage_error(e),
    }
}

async fn health(State(state): State<AppState>) -> Response {
    let registered = match state.repo.list_all(true).await {
        Ok(all) => all.len(),
        Err(e) => return storage_error(e),
    };
    let active = match state.repo.list_all(false).await {
        Ok(live) => live.len(),
        Err(e) => return storage_error(e),
    };
    Json(json!({
        "status": "healthy",
        "registered": registered,
        "active": active,
    }))
    .into_response()
}
