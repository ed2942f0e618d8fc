//! # agentflow
//!
//! Configurable LLM workflow engine with the surrounding services a
//! deployed agent fleet needs:
//!
//! - **Core engine** ([`core`]): compiles a declarative workflow config
//!   into an executable graph (linear, fork-join, conditional, and
//!   bounded-loop edges) and drives it with a deterministic superstep
//!   scheduler over typed state.
//! - **Runtime** ([`runtime`]): the façade that loads config, runs the
//!   graph, records executions and state snapshots, profiles nodes, and
//!   applies quality gates.
//! - **Registry** ([`registry`]): TTL-leased deployment registry (HTTP
//!   service plus worker-side client with a heartbeat loop).
//! - **Orchestrator** ([`orchestrator`]): discovers live workers by
//!   metadata, manages connections, and dispatches executions with
//!   bounded parallelism and per-call timeouts.
//! - **Webhooks** ([`webhooks`]): HMAC-verified, idempotent ingress that
//!   launches workflows as background tasks.
//! - **Storage** ([`storage`]): repository traits with a SQLite backend.
//! - **Memory** ([`memory`]): namespaced persistent KV for agents.
//!
//! ## Example
//!
//! ```ignore
//! use agentflow::runtime::WorkflowRuntime;
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! let runtime = WorkflowRuntime::new(Arc::new(my_provider));
//! let inputs = BTreeMap::from([("topic".into(), "AI safety".into())]);
//! let result = runtime.run("workflows/article.yaml", inputs).await?;
//! println!("{:?}", result.outputs);
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod orchestrator;
pub mod registry;
pub mod runtime;
pub mod sandbox;
pub mod storage;
pub mod webhooks;

pub use config::{load_config, validate_config, WorkflowConfig};
pub use error::AgentFlowError;
pub use llm::{LlmProvider, LlmResponse, TokenUsage};
pub use runtime::{RunResult, WorkflowRuntime};
