//! Webhook ingress
//!
//! External events enter here: a generic JSON endpoint with HMAC
//! signature validation and idempotency protection, plus the WhatsApp
//! platform endpoints. Accepted events launch workflows as background
//! tasks; the HTTP response is an acknowledgment, never the final
//! result.

pub mod signature;
pub mod whatsapp;

pub use signature::{sign, verify_signature};
pub use whatsapp::{chunk_message, parse_command, WhatsAppHandler};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::error::{AgentFlowError, StorageError, WebhookError};
use crate::runtime::WorkflowRuntime;
use crate::storage::WebhookEventRepository;

/// Launches workflows by name on behalf of webhook events.
///
/// The ingress depends on this trait rather than the runtime directly so
/// tests can observe launches without running a real workflow.
#[async_trait]
pub trait WorkflowLauncher: Send + Sync {
    async fn launch(&self, workflow_name: &str, inputs: Value) -> Result<Value, AgentFlowError>;
}

/// Launcher that resolves `<config_dir>/<workflow_name>.yaml` and runs it
/// through the workflow runtime.
pub struct RuntimeLauncher {
    runtime: Arc<WorkflowRuntime>,
    config_dir: PathBuf,
}

impl RuntimeLauncher {
    pub fn new(runtime: Arc<WorkflowRuntime>, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            config_dir: config_dir.into(),
        }
    }
}

#[async_trait]
impl WorkflowLauncher for RuntimeLauncher {
    async fn launch(&self, workflow_name: &str, inputs: Value) -> Result<Value, AgentFlowError> {
        let path = self.config_dir.join(format!("{}.yaml", workflow_name));
        let inputs: BTreeMap<String, Value> = inputs
            .as_object()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        let result = self.runtime.run(path, inputs).await?;
        Ok(Value::Object(result.outputs.into_iter().collect()))
    }
}

/// Signature settings for the generic endpoint.
#[derive(Debug, Clone, Default)]
pub struct WebhookConfig {
    /// Shared secret; signature verification is active when set
    pub secret: Option<String>,
    /// Require a signature even when no secret is configured
    pub signature_required: bool,
}

impl WebhookConfig {
    /// Resolve from the environment: `WEBHOOK_SECRET_GENERIC` falls back
    /// to `WEBHOOK_SECRET_DEFAULT`; `WEBHOOK_SIGNATURE_REQUIRED=true`
    /// forces the header.
    pub fn from_env() -> Self {
        let secret = std::env::var("WEBHOOK_SECRET_GENERIC")
            .or_else(|_| std::env::var("WEBHOOK_SECRET_DEFAULT"))
            .ok()
            .filter(|s| !s.is_empty());
        let signature_required = std::env::var("WEBHOOK_SIGNATURE_REQUIRED")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self {
            secret,
            signature_required,
        }
    }
}

/// Shared state of the webhook router.
#[derive(Clone)]
pub struct WebhookState {
    launcher: Arc<dyn WorkflowLauncher>,
    events: Arc<dyn WebhookEventRepository>,
    config: WebhookConfig,
    whatsapp: Option<Arc<WhatsAppHandler>>,
}

impl WebhookState {
    pub fn new(
        launcher: Arc<dyn WorkflowLauncher>,
        events: Arc<dyn WebhookEventRepository>,
        config: WebhookConfig,
    ) -> Self {
        Self {
            launcher,
            events,
            config,
            whatsapp: None,
        }
    }

    pub fn with_whatsapp(mut self, handler: Arc<WhatsAppHandler>) -> Self {
        self.whatsapp = Some(handler);
        self
    }
}

/// Build the webhook ingress router.
pub fn webhook_router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhooks/generic", post(generic_webhook))
        .route("/webhooks/whatsapp", get(whatsapp_verify))
        .route("/webhooks/whatsapp", post(whatsapp_receive))
        .route("/webhooks/health", get(webhook_health))
        .with_state(state)
}

fn error_response(err: &WebhookError) -> Response {
    let status = match err {
        WebhookError::InvalidSignature(_) => StatusCode::FORBIDDEN,
        WebhookError::Replay(_) => StatusCode::CONFLICT,
        WebhookError::Payload(_) => StatusCode::BAD_REQUEST,
        WebhookError::Handler(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let mut body = json!({ "detail": err.to_string() });
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        body["correlation_id"] = json!(uuid::Uuid::new_v4().to_string());
    }
    (status, Json(body)).into_response()
}

async fn generic_webhook(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    match handle_generic(&state, &headers, &body).await {
        Ok(ack) => Json(ack).into_response(),
        Err(err) => {
            match &err {
                WebhookError::Handler(_) => error!(error = %err, "Generic webhook failed"),
                _ => warn!(error = %err, "Generic webhook rejected"),
            }
            error_response(&err)
        }
    }
}

async fn handle_generic(
    state: &WebhookState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Value, WebhookError> {
    // Signature check: active whenever a secret is configured or the
    // deployment requires signatures outright.
    if state.config.secret.is_some() || state.config.signature_required {
        let header = headers
            .get("X-Signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| WebhookError::InvalidSignature("missing X-Signature header".into()))?;
        let secret = state
            .config
            .secret
            .as_deref()
            .ok_or_else(|| WebhookError::InvalidSignature("no webhook secret configured".into()))?;
        verify_signature(secret, body, header)?;
    }

    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| WebhookError::Payload(format!("invalid JSON body: {}", e)))?;

    let workflow_name = payload
        .get("workflow_name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| WebhookError::Payload("missing 'workflow_name' in payload".into()))?
        .to_string();
    let inputs = payload
        .get("inputs")
        .cloned()
        .ok_or_else(|| WebhookError::Payload("missing 'inputs' in payload".into()))?;

    // Idempotency gate: the unique insert happens before invocation, so
    // a concurrent replay loses the race and sees the conflict.
    let webhook_id = payload
        .get("webhook_id")
        .or_else(|| payload.get("id"))
        .and_then(|v| v.as_str())
        .map(String::from);
    if let Some(id) = &webhook_id {
        match state.events.mark_processed(id, "generic").await {
            Ok(()) => {}
            Err(StorageError::Duplicate(_)) => {
                return Err(WebhookError::Replay(id.clone()));
            }
            Err(e) => return Err(WebhookError::Handler(e.to_string())),
        }
    }

    info!(workflow = %workflow_name, webhook_id = ?webhook_id, "Webhook accepted, launching workflow");

    let launcher = Arc::clone(&state.launcher);
    let launched_workflow = workflow_name.clone();
    tokio::spawn(async move {
        if let Err(e) = launcher.launch(&launched_workflow, inputs).await {
            error!(workflow = %launched_workflow, error = %e, "Webhook-triggered workflow failed");
        }
    });

    Ok(json!({
        "status": "accepted",
        "workflow_name": workflow_name,
        "webhook_id": webhook_id,
    }))
}

async fn whatsapp_verify(
    State(state): State<WebhookState>,
    Query(params): Query<std::collections::HashMap<String, String>>,
) -> Response {
    let Some(handler) = &state.whatsapp else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "detail": "WhatsApp webhooks not configured" })),
        )
            .into_response();
    };

    let mode = params.get("hub.mode").map(String::as_str).unwrap_or_default();
    let token = params
        .get("hub.verify_token")
        .map(String::as_str)
        .unwrap_or_default();
    let challenge = params
        .get("hub.challenge")
        .map(String::as_str)
        .unwrap_or_default();

    match handler.verify(mode, token, challenge) {
        Some(challenge) => challenge.into_response(),
        None => (
            StatusCode::FORBIDDEN,
            Json(json!({ "detail": "Webhook verification failed" })),
        )
            .into_response(),
    }
}

async fn whatsapp_receive(State(state): State<WebhookState>, Json(payload): Json<Value>) -> Response {
    let Some(handler) = &state.whatsapp else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "detail": "WhatsApp webhooks not configured" })),
        )
            .into_response();
    };

    let (Some(sender), Some(text)) = (
        WhatsAppHandler::extract_sender(&payload),
        WhatsAppHandler::extract_text(&payload),
    ) else {
        // Delivery receipts and other non-message events land here
        return Json(json!({ "status": "no_message" })).into_response();
    };

    let Some((workflow_name, topic)) = parse_command(&text) else {
        let handler = Arc::clone(handler);
        tokio::spawn(async move {
            handler
                .send_message(&sender, "Send /workflow_name <input> to run a workflow.")
                .await;
        });
        return Json(json!({ "status": "received", "message": "help" })).into_response();
    };

    info!(workflow = %workflow_name, sender = %sender, "WhatsApp command received");

    let launcher = Arc::clone(&state.launcher);
    let handler = Arc::clone(handler);
    let launched_workflow = workflow_name.clone();
    tokio::spawn(async move {
        let reply = match launcher
            .launch(&launched_workflow, json!({ "topic": topic }))
            .await
        {
            Ok(outputs) => format!("Workflow '{}' finished:\n{}", launched_workflow, outputs),
            Err(e) => format!("Workflow '{}' failed: {}", launched_workflow, e),
        };
        handler.send_message(&sender, &reply).await;
    });

    Json(json!({ "status": "received", "workflow_name": workflow_name })).into_response()
}

async fn webhook_health(State(state): State<WebhookState>) -> Response {
    Json(json!({
        "status": "healthy",
        "service": "webhooks",
        "signature_configured": state.config.secret.is_some(),
        "signature_required": state.config.signature_required,
        "whatsapp_configured": state.whatsapp.is_some(),
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStore;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    /// Launcher that counts invocations.
    struct CountingLauncher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WorkflowLauncher for CountingLauncher {
        async fn launch(
            &self,
            _workflow_name: &str,
            _inputs: Value,
        ) -> Result<Value, AgentFlowError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"ok": true}))
        }
    }

    async fn router_with(
        config: WebhookConfig,
    ) -> (Router, Arc<CountingLauncher>, Arc<SqliteStore>) {
        let launcher = Arc::new(CountingLauncher {
            calls: AtomicUsize::new(0),
        });
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let state = WebhookState::new(launcher.clone(), store.clone(), config);
        (webhook_router(state), launcher, store)
    }

    fn generic_request(body: Value, signature: Option<&str>) -> Request<Body> {
        let mut builder = Request::post("/webhooks/generic").header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("X-Signature", signature);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_generic_accepts_and_launches() {
        let (router, launcher, _) = router_with(WebhookConfig::default()).await;

        let response = router
            .oneshot(generic_request(
                json!({"workflow_name": "echo", "inputs": {"x": 1}}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_generic_missing_fields_is_400() {
        let (router, _, _) = router_with(WebhookConfig::default()).await;

        let response = router
            .clone()
            .oneshot(generic_request(json!({"inputs": {}}), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(generic_request(json!({"workflow_name": "echo"}), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_generic_invalid_json_is_400() {
        let (router, _, _) = router_with(WebhookConfig::default()).await;
        let response = router
            .oneshot(
                Request::post("/webhooks/generic")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_signature_enforced_when_secret_configured() {
        let config = WebhookConfig {
            secret: Some("s3cret".into()),
            signature_required: true,
        };
        let (router, launcher, _) = router_with(config).await;

        let body = json!({"workflow_name": "echo", "inputs": {}});

        // Missing header
        let response = router
            .clone()
            .oneshot(generic_request(body.clone(), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // Wrong signature
        let response = router
            .clone()
            .oneshot(generic_request(body.clone(), Some("sha256=deadbeef")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // Correct signature
        let signature = sign("s3cret", body.to_string().as_bytes());
        let response = router
            .oneshot(generic_request(body, Some(&signature)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_replay_is_409_and_single_launch() {
        let (router, launcher, _) = router_with(WebhookConfig::default()).await;
        let body = json!({"workflow_name": "echo", "inputs": {"x": 1}, "webhook_id": "w1"});

        let response = router
            .clone()
            .oneshot(generic_request(body.clone(), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(generic_request(body, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_whatsapp_verify_handshake() {
        let launcher = Arc::new(CountingLauncher {
            calls: AtomicUsize::new(0),
        });
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let state = WebhookState::new(launcher, store, WebhookConfig::default())
            .with_whatsapp(Arc::new(WhatsAppHandler::new("123", "token", "verify-me")));
        let router = webhook_router(state);

        let response = router
            .clone()
            .oneshot(
                Request::get(
                    "/webhooks/whatsapp?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=42",
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"42");

        let response = router
            .oneshot(
                Request::get(
                    "/webhooks/whatsapp?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=42",
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_whatsapp_unconfigured_is_503() {
        let (router, _, _) = router_with(WebhookConfig::default()).await;
        let response = router
            .oneshot(
                Request::get("/webhooks/whatsapp?hub.mode=subscribe")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_reports_configuration() {
        let config = WebhookConfig {
            secret: Some("s".into()),
            signature_required: false,
        };
        let (router, _, _) = router_with(config).await;

        let response = router
            .oneshot(Request::get("/webhooks/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["signature_configured"], true);
        assert_eq!(body["whatsapp_configured"], false);
    }
}
