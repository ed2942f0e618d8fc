//! Sandboxed code execution capability
//!
//! Nodes may carry a `code` field instead of calling the LLM. The engine
//! depends only on the `CodeExecutor` trait; the default implementation
//! (process or container isolation with CPU, memory, network, and
//! wall-clock limits) lives outside this crate.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NodeError;

/// Resource limits a code executor must enforce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxLimits {
    /// Wall-clock limit in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Memory ceiling in megabytes
    #[serde(default = "default_memory")]
    pub memory_mb: u64,

    /// Whether the sandbox may open network connections
    #[serde(default)]
    pub network: bool,

    /// Named preset overriding the individual limits (e.g. "strict")
    #[serde(default)]
    pub preset: Option<String>,
}

fn default_timeout() -> u64 {
    30
}

fn default_memory() -> u64 {
    256
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            memory_mb: default_memory(),
            network: false,
            preset: None,
        }
    }
}

/// Capability to run node code under resource limits.
///
/// `execute` receives the node's resolved inputs and returns a single
/// `result` value that the node executor binds to the node's first output
/// field.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(
        &self,
        code: &str,
        inputs: &BTreeMap<String, Value>,
        limits: &SandboxLimits,
    ) -> Result<Value, NodeError>;
}
