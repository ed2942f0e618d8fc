//! Shared test doubles for integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use agentflow::config::LlmSettings;
use agentflow::error::{LlmError, NodeError};
use agentflow::llm::{LlmProvider, LlmResponse, TokenUsage};
use agentflow::sandbox::{CodeExecutor, SandboxLimits};

/// Echoes the resolved prompt back, uppercased, as the structured value.
///
/// With this provider a node's output is a deterministic function of its
/// prompt, which makes end-to-end assertions exact.
pub struct UppercaseEcho {
    pub calls: AtomicUsize,
    pub delay: Option<Duration>,
}

impl UppercaseEcho {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Some(delay),
        }
    }
}

#[async_trait]
impl LlmProvider for UppercaseEcho {
    async fn complete(
        &self,
        prompt: &str,
        _tools: &[String],
        output_schema: &Value,
        _settings: Option<&LlmSettings>,
    ) -> Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let value = if output_schema.get("fields").is_some() {
            // Object contracts get every declared string field set to the
            // uppercased prompt
            let fields = output_schema["fields"].as_object().unwrap();
            Value::Object(
                fields
                    .keys()
                    .map(|name| (name.clone(), json!(prompt.to_uppercase())))
                    .collect(),
            )
        } else {
            json!(prompt.to_uppercase())
        };

        Ok(LlmResponse::new(value).with_usage(TokenUsage::new(5, 5)))
    }

    fn name(&self) -> &str {
        "uppercase-echo"
    }
}

/// Code executor that parses its `current` input and returns it plus one.
pub struct IncrementExecutor;

#[async_trait]
impl CodeExecutor for IncrementExecutor {
    async fn execute(
        &self,
        _code: &str,
        inputs: &BTreeMap<String, Value>,
        _limits: &SandboxLimits,
    ) -> Result<Value, NodeError> {
        let current: i64 = inputs
            .get("current")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        Ok(json!(current + 1))
    }
}
