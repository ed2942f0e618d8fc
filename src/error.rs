//! Error types for the agentflow crate
//!
//! Each subsystem raises a focused error enum; `AgentFlowError` is the
//! umbrella type the runtime facade and HTTP handlers work with.

use thiserror::Error;

/// Errors raised while loading or validating workflow configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read or parsed
    #[error("Failed to load config: {0}")]
    Load(String),

    /// Config parsed but violates structural rules
    #[error("Invalid config: {0}")]
    Validation(String),
}

/// Raised when a prompt template references an unresolvable variable
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TemplateError {
    /// Human-readable description listing candidates and suggestions
    pub message: String,
    /// The placeholder that failed to resolve
    pub variable: String,
}

impl TemplateError {
    pub fn new(variable: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            variable: variable.into(),
        }
    }
}

/// Raised when condition evaluation or routing fails
#[derive(Debug, Error)]
#[error("Control flow error: {0}")]
pub struct ControlFlowError(pub String);

/// Raised when an output schema is invalid or LLM output violates it
#[derive(Debug, Error)]
#[error("Output error for '{model}': {message}")]
pub struct OutputError {
    /// Diagnostic model name, `Output_<node_id>`
    pub model: String,
    pub message: String,
}

impl OutputError {
    pub fn new(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            message: message.into(),
        }
    }
}

/// Raised when state construction or a merge violates the state schema
#[derive(Debug, Error)]
#[error("State error: {0}")]
pub struct StateError(pub String);

/// Errors from LLM provider adapters
#[derive(Debug, Error)]
pub enum LlmError {
    /// Provider misconfiguration (bad model name, missing credentials)
    #[error("LLM config error: {0}")]
    Config(String),

    /// API-level failure; `retryable` marks rate limits and transient faults
    #[error("LLM API error: {message} (retryable: {retryable})")]
    Api { message: String, retryable: bool },

    /// Any other provider failure
    #[error("LLM provider error: {0}")]
    Provider(String),
}

impl LlmError {
    pub fn api(message: impl Into<String>, retryable: bool) -> Self {
        Self::Api {
            message: message.into(),
            retryable,
        }
    }

    /// Whether the node executor should retry after backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Api { retryable: true, .. })
    }
}

/// Wraps any failure during node execution with node context
#[derive(Debug, Error)]
#[error("Node '{node_id}': {message}")]
pub struct NodeError {
    pub node_id: String,
    pub message: String,
    pub retryable: bool,
}

impl NodeError {
    pub fn new(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            message: message.into(),
            retryable: true,
        }
    }
}

/// Errors from the graph scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The superstep guard tripped; usually a router cycle that never exits
    #[error("Max supersteps exceeded: {0}")]
    MaxSupersteps(usize),

    /// Execution stopped by the cancellation signal
    #[error("Workflow cancelled")]
    Cancelled,

    /// A task delivered to a node with no registered edge
    #[error("No outgoing edge from node '{0}'")]
    MissingEdge(String),

    /// A join barrier received some but not all of its deliveries
    #[error("Fork-join barrier never completed: {0}")]
    IncompleteJoin(String),

    /// Wall-clock limit for the whole workflow
    #[error("Workflow timeout after {0:?}")]
    Timeout(std::time::Duration),
}

/// Raised when quality gates fail under the `fail` policy
#[derive(Debug, Error)]
#[error("{message}")]
pub struct GateError {
    pub message: String,
    /// Metric names of every gate that failed
    pub failed_metrics: Vec<String>,
}

/// Errors raised by webhook ingress
#[derive(Debug, Error)]
pub enum WebhookError {
    /// HMAC signature missing or mismatched (maps to 403)
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Idempotency key already processed (maps to 409)
    #[error("Replay detected: webhook '{0}' already processed")]
    Replay(String),

    /// Request body could not be parsed (maps to 400)
    #[error("Invalid payload: {0}")]
    Payload(String),

    /// Downstream handler failure (maps to 500)
    #[error("Webhook handler error: {0}")]
    Handler(String),
}

/// Errors from the persistence layer
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage error: {0}")]
    Backend(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique-key violation; the webhook idempotency gate relies on this
    #[error("Duplicate key: {0}")]
    Duplicate(String),
}

impl From<tokio_rusqlite::Error> for StorageError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Umbrella error carried by the runtime facade
#[derive(Debug, Error)]
pub enum AgentFlowError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    ControlFlow(#[from] ControlFlowError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AgentFlowError {
    /// Terminal execution status for persistence: "failed" or "cancelled"
    pub fn terminal_status(&self) -> &'static str {
        match self {
            AgentFlowError::Scheduler(SchedulerError::Cancelled) => "cancelled",
            _ => "failed",
        }
    }
}
