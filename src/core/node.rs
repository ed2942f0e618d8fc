//! Node execution
//!
//! One node execution resolves the prompt template, calls the LLM (or the
//! sandboxed code executor), validates the result against the node's
//! output contract, and returns a state patch mapping declared output
//! fields to values. Validation failures and transient API errors are
//! retried with backoff up to a per-node budget.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use super::output::{OutputValidator, ValidatedOutput};
use super::state::{StateInstance, StatePatch};
use super::template::resolve_prompt;
use crate::config::{GlobalConfig, LlmSettings, NodeConfig};
use crate::error::NodeError;
use crate::llm::{LlmProvider, TokenUsage};
use crate::observability::Tracker;
use crate::sandbox::{CodeExecutor, SandboxLimits};

const DEFAULT_MAX_RETRIES: usize = 3;

/// Result of one node execution.
#[derive(Debug, Clone)]
pub struct NodeOutcome {
    /// Declared output fields to merge into state
    pub patch: StatePatch,
    /// Accumulated token usage across retries
    pub usage: Option<TokenUsage>,
}

/// Executes nodes against an LLM provider and an optional code executor.
pub struct NodeExecutor {
    llm: Arc<dyn LlmProvider>,
    code: Option<Arc<dyn CodeExecutor>>,
}

impl NodeExecutor {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm, code: None }
    }

    pub fn with_code_executor(mut self, code: Arc<dyn CodeExecutor>) -> Self {
        self.code = Some(code);
        self
    }

    /// Execute a node against the current state.
    pub async fn execute(
        &self,
        node: &NodeConfig,
        state: &StateInstance,
        global: &GlobalConfig,
        tracker: &dyn Tracker,
    ) -> Result<NodeOutcome, NodeError> {
        let inputs = self.resolve_inputs(node, state)?;
        let prompt = resolve_prompt(&node.prompt, &inputs, state)
            .map_err(|e| NodeError::new(&node.id, e.to_string()))?;

        let validator = OutputValidator::from_config(&node.output_schema, &node.id)
            .map_err(|e| NodeError::new(&node.id, e.to_string()))?;

        debug!(node = %node.id, prompt_len = prompt.len(), "Executing node");

        let (validated, usage) = if let Some(code) = &node.code {
            let result = self.run_code(node, code, &inputs).await?;
            (BTreeMap::from([("result".to_string(), result)]), None)
        } else {
            self.run_llm(node, global, &prompt, &validator).await?
        };

        if let Some(usage) = &usage {
            tracker.log_metric(
                &format!("node_{}_tokens", node.id),
                usage.total_tokens as f64,
            );
        }

        let patch = map_outputs(node, &validator, validated)?;
        Ok(NodeOutcome { patch, usage })
    }

    /// Resolve `node.inputs` (each value is itself a template over state).
    fn resolve_inputs(
        &self,
        node: &NodeConfig,
        state: &StateInstance,
    ) -> Result<BTreeMap<String, Value>, NodeError> {
        let empty = BTreeMap::new();
        let mut resolved = BTreeMap::new();
        for (name, template) in &node.inputs {
            let value = resolve_prompt(template, &empty, state)
                .map_err(|e| NodeError::new(&node.id, e.to_string()))?;
            resolved.insert(name.clone(), Value::String(value));
        }
        Ok(resolved)
    }

    async fn run_code(
        &self,
        node: &NodeConfig,
        code: &str,
        inputs: &BTreeMap<String, Value>,
    ) -> Result<Value, NodeError> {
        let executor = self.code.as_ref().ok_or_else(|| {
            NodeError::new(&node.id, "Node declares code but no code executor is configured")
        })?;
        let limits = node.sandbox.clone().unwrap_or_else(SandboxLimits::default);
        executor.execute(code, inputs, &limits).await
    }

    /// LLM call loop: validation failures retry with the error appended to
    /// the prompt; retryable API errors back off exponentially.
    async fn run_llm(
        &self,
        node: &NodeConfig,
        global: &GlobalConfig,
        prompt: &str,
        validator: &OutputValidator,
    ) -> Result<(ValidatedOutput, Option<TokenUsage>), NodeError> {
        let settings = merged_settings(global, node);
        let max_retries = settings.max_retries.unwrap_or(DEFAULT_MAX_RETRIES).max(1);
        let schema = validator.describe();

        let mut prompt = prompt.to_string();
        let mut total_usage: Option<TokenUsage> = None;

        for attempt in 0..max_retries {
            let response = match self
                .llm
                .complete(&prompt, &node.tools, &schema, Some(&settings))
                .await
            {
                Ok(response) => response,
                Err(err) if err.is_retryable() && attempt + 1 < max_retries => {
                    let wait = Duration::from_secs(1 << attempt);
                    warn!(node = %node.id, attempt, error = %err, "Retryable LLM error, backing off");
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Err(err) => {
                    let retryable = err.is_retryable();
                    let message = format!("LLM call failed: {}", err);
                    return Err(if retryable {
                        NodeError::retryable(&node.id, message)
                    } else {
                        NodeError::new(&node.id, message)
                    });
                }
            };

            if let Some(usage) = &response.usage {
                total_usage.get_or_insert_with(TokenUsage::default).add(usage);
            }

            match validator.validate(&response.value) {
                Ok(validated) => return Ok((validated, total_usage)),
                Err(err) if attempt + 1 < max_retries => {
                    warn!(node = %node.id, attempt, error = %err, "Output validation failed, retrying");
                    prompt = format!(
                        "{}\n\nYour previous response was invalid: {}. \
                         Respond strictly following the required output schema.",
                        prompt, err.message
                    );
                    tokio::time::sleep(Duration::from_millis(500 * (attempt as u64 + 1))).await;
                }
                Err(err) => {
                    return Err(NodeError::new(
                        &node.id,
                        format!("Output validation failed after {} attempts: {}", max_retries, err),
                    ))
                }
            }
        }

        // Loop always returns; max_retries >= 1
        unreachable!("retry loop exits via return")
    }
}

/// Map a validated output onto the node's declared output fields.
fn map_outputs(
    node: &NodeConfig,
    validator: &OutputValidator,
    validated: ValidatedOutput,
) -> Result<StatePatch, NodeError> {
    let mut patch = StatePatch::new();

    if validator.is_simple() || node.code.is_some() {
        let field = node.outputs.first().ok_or_else(|| {
            NodeError::new(&node.id, "Node declares no output fields")
        })?;
        let value = validated
            .get("result")
            .cloned()
            .ok_or_else(|| NodeError::new(&node.id, "Missing 'result' in validated output"))?;
        patch.insert(field.clone(), value);
    } else {
        for field in &node.outputs {
            let value = validated.get(field).cloned().ok_or_else(|| {
                NodeError::new(
                    &node.id,
                    format!("Output schema produced no value for field '{}'", field),
                )
            })?;
            patch.insert(field.clone(), value);
        }
    }

    Ok(patch)
}

fn merged_settings(global: &GlobalConfig, node: &NodeConfig) -> LlmSettings {
    let base = global.llm.clone().unwrap_or_default();
    let Some(overrides) = &node.llm else {
        return base;
    };
    LlmSettings {
        model: overrides.model.clone().or(base.model),
        temperature: overrides.temperature.or(base.temperature),
        max_tokens: overrides.max_tokens.or(base.max_tokens),
        max_retries: overrides.max_retries.or(base.max_retries),
    }
}
