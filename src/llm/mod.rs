//! LLM provider abstraction
//!
//! The engine talks to language models through one operation: generate a
//! structured value for a prompt, given an output contract and available
//! tools. Concrete providers live outside this crate; the node executor
//! only depends on the trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::LlmSettings;
use crate::error::LlmError;

/// Token accounting for one completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Provider-reported cost, if it reports one
    #[serde(default)]
    pub cost_usd: Option<f64>,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cost_usd: None,
        }
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }

    /// Accumulate another call's usage into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        if let Some(cost) = other.cost_usd {
            *self.cost_usd.get_or_insert(0.0) += cost;
        }
    }
}

/// A structured completion result.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Parsed structured output; shape is checked by the output validator
    pub value: Value,
    /// Token usage, if the provider reports it
    pub usage: Option<TokenUsage>,
}

impl LlmResponse {
    pub fn new(value: Value) -> Self {
        Self { value, usage: None }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Provider-agnostic structured completion.
///
/// Implementations bridge to a concrete API. The `output_schema` argument
/// is the contract description from `OutputValidator::describe`, letting
/// providers with native structured output enforce the shape server-side.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate structured output for a resolved prompt.
    async fn complete(
        &self,
        prompt: &str,
        tools: &[String],
        output_schema: &Value,
        settings: Option<&LlmSettings>,
    ) -> Result<LlmResponse, LlmError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn complete(
            &self,
            prompt: &str,
            _tools: &[String],
            _output_schema: &Value,
            _settings: Option<&LlmSettings>,
        ) -> Result<LlmResponse, LlmError> {
            Ok(LlmResponse::new(json!(prompt)).with_usage(TokenUsage::new(3, 5)))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn test_echo_provider_roundtrip() {
        let provider = EchoProvider;
        let response = provider
            .complete("hello", &[], &json!({"type": "str"}), None)
            .await
            .unwrap();

        assert_eq!(response.value, json!("hello"));
        assert_eq!(response.usage.unwrap().total_tokens, 8);
    }

    #[test]
    fn test_token_usage_accumulation() {
        let mut total = TokenUsage::default();
        total.add(&TokenUsage::new(10, 5));
        total.add(&TokenUsage::new(2, 3).with_cost(0.25));

        assert_eq!(total.prompt_tokens, 12);
        assert_eq!(total.completion_tokens, 8);
        assert_eq!(total.total_tokens, 20);
        assert_eq!(total.cost_usd, Some(0.25));
    }

    #[test]
    fn test_token_usage_cost_sums() {
        let mut total = TokenUsage::new(1, 1).with_cost(0.1);
        total.add(&TokenUsage::new(1, 1).with_cost(0.2));
        assert!((total.cost_usd.unwrap() - 0.3).abs() < 1e-9);
    }
}
