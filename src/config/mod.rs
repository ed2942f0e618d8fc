//! Workflow configuration schema
//!
//! Declarative description of a workflow: typed state fields, nodes with
//! prompts and output contracts, and the edge list (linear, fork,
//! conditional, loop). Configs are loaded from YAML or JSON and validated
//! structurally before the graph builder sees them.

mod loader;
mod validate;

pub use loader::{load_config, parse_config};
pub use validate::validate_config;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Sentinel node id for the virtual entry terminal.
pub const START: &str = "START";
/// Sentinel node id for the virtual exit terminal.
pub const END: &str = "END";

/// Top-level workflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Config format version; must be present in every file
    pub schema_version: String,

    pub flow: FlowInfo,

    /// Global overrides shared by every node
    #[serde(default)]
    pub config: GlobalConfig,

    pub state: StateSchemaConfig,

    pub nodes: Vec<NodeConfig>,

    pub edges: Vec<EdgeConfig>,
}

impl WorkflowConfig {
    /// Look up a node config by id.
    pub fn node(&self, id: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Union of every node's declared output fields, in declaration order.
    pub fn output_fields(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for node in &self.nodes {
            for field in &node.outputs {
                if !seen.contains(field) {
                    seen.push(field.clone());
                }
            }
        }
        seen
    }
}

/// Workflow identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Global configuration applying to all nodes unless overridden.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default LLM settings for every node
    #[serde(default)]
    pub llm: Option<LlmSettings>,

    /// Quality gates evaluated after each run
    #[serde(default)]
    pub gates: Option<GatesSpec>,

    /// Engine tuning knobs
    #[serde(default)]
    pub engine: EngineConfig,
}

/// LLM settings, usable globally or as a per-node override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Retry budget for validation and transient API failures
    #[serde(default)]
    pub max_retries: Option<usize>,
}

/// Declarative quality gates (see `runtime::gates`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatesSpec {
    #[serde(default)]
    pub gates: Vec<GateSpec>,
    #[serde(default)]
    pub on_fail: GatePolicy,
}

/// A single metric threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSpec {
    pub metric: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

/// What to do when a gate fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePolicy {
    #[default]
    Warn,
    Fail,
    BlockDeploy,
}

/// Engine tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Guard against router cycles that never reach END
    pub max_supersteps: usize,

    /// Maximum concurrent tasks within a fork group
    pub fork_parallelism: usize,

    /// Wall-clock limit per node execution
    #[serde(with = "humantime_serde")]
    pub node_timeout: Duration,

    /// Wall-clock limit for the whole workflow
    #[serde(with = "humantime_serde")]
    pub workflow_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_supersteps: 100,
            fork_parallelism: num_cpus::get(),
            node_timeout: Duration::from_secs(300),
            workflow_timeout: Duration::from_secs(3600),
        }
    }
}

impl EngineConfig {
    pub fn with_max_supersteps(mut self, max: usize) -> Self {
        self.max_supersteps = max;
        self
    }

    pub fn with_fork_parallelism(mut self, parallelism: usize) -> Self {
        self.fork_parallelism = parallelism.max(1);
        self
    }

    pub fn with_workflow_timeout(mut self, timeout: Duration) -> Self {
        self.workflow_timeout = timeout;
        self
    }
}

/// State schema: ordered mapping of field name to declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSchemaConfig {
    pub fields: BTreeMap<String, StateFieldConfig>,
}

/// Declaration of one state field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFieldConfig {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Supported state field types.
///
/// Serialized in the config file as strings: `str`, `int`, `float`,
/// `bool`, `list[T]`, `dict[K,V]`, `any`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Str,
    Int,
    Float,
    Bool,
    List(Box<FieldType>),
    Dict(Box<FieldType>, Box<FieldType>),
    Any,
}

impl FieldType {
    /// Whether a JSON value conforms to this type.
    ///
    /// Containers are checked at the top level only; element types are
    /// advisory.
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            FieldType::Str => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            // An int literal is acceptable where a float is declared
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::List(_) => value.is_array(),
            FieldType::Dict(_, _) => value.is_object(),
            FieldType::Any => !matches!(value, Value::Null),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Str => write!(f, "str"),
            FieldType::Int => write!(f, "int"),
            FieldType::Float => write!(f, "float"),
            FieldType::Bool => write!(f, "bool"),
            FieldType::List(t) => write!(f, "list[{}]", t),
            FieldType::Dict(k, v) => write!(f, "dict[{},{}]", k, v),
            FieldType::Any => write!(f, "any"),
        }
    }
}

impl FromStr for FieldType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "str" | "string" => return Ok(FieldType::Str),
            "int" => return Ok(FieldType::Int),
            "float" => return Ok(FieldType::Float),
            "bool" => return Ok(FieldType::Bool),
            "any" => return Ok(FieldType::Any),
            _ => {}
        }
        if let Some(inner) = s.strip_prefix("list[").and_then(|r| r.strip_suffix(']')) {
            return Ok(FieldType::List(Box::new(inner.parse()?)));
        }
        if let Some(inner) = s.strip_prefix("dict[").and_then(|r| r.strip_suffix(']')) {
            let (k, v) = inner.split_once(',').ok_or_else(|| {
                ConfigError::Validation(format!("dict type needs two parameters: {}", s))
            })?;
            return Ok(FieldType::Dict(Box::new(k.parse()?), Box::new(v.parse()?)));
        }
        Err(ConfigError::Validation(format!("Unknown field type: {}", s)))
    }
}

impl Serialize for FieldType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Configuration of one workflow node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,

    /// Prompt template; `{name}` placeholders resolve from inputs and state
    pub prompt: String,

    /// Named inputs, each itself a template over state
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,

    pub output_schema: OutputSchemaConfig,

    /// State fields this node's output is mapped onto
    pub outputs: Vec<String>,

    #[serde(default)]
    pub tools: Vec<String>,

    /// Inline code executed by the sandboxed code executor instead of the LLM
    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub sandbox: Option<crate::sandbox::SandboxLimits>,

    /// Per-node LLM override
    #[serde(default)]
    pub llm: Option<LlmSettings>,

    /// Per-node observability toggle
    #[serde(default)]
    pub observability: Option<NodeObservability>,
}

/// Per-node observability override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeObservability {
    #[serde(default)]
    pub enabled: bool,
}

/// Declared output contract of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSchemaConfig {
    /// `str`, `int`, `float`, `bool`, `list[...]`, or `object`
    #[serde(rename = "type")]
    pub schema_type: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Field list, required when `type == "object"`
    #[serde(default)]
    pub fields: Option<Vec<OutputFieldConfig>>,
}

/// One field of an object output schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputFieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub description: Option<String>,
}

/// Edge between nodes. Exactly one of `to`, `routes`, `loop` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    pub from: String,

    /// Linear target, or fork targets when a list
    #[serde(default)]
    pub to: Option<EdgeTarget>,

    /// Conditional routes, evaluated in order; exactly one has logic "default"
    #[serde(default)]
    pub routes: Option<Vec<RouteConfig>>,

    /// Bounded loop back to `from`
    #[serde(default, rename = "loop")]
    pub loop_spec: Option<LoopConfig>,
}

/// Linear vs fork target form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EdgeTarget {
    One(String),
    Many(Vec<String>),
}

impl EdgeTarget {
    /// Targets as a slice regardless of form.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            EdgeTarget::One(t) => vec![t.as_str()],
            EdgeTarget::Many(ts) => ts.iter().map(|t| t.as_str()).collect(),
        }
    }
}

/// One conditional route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub condition: ConditionConfig,
    pub to: String,
}

/// Condition wrapper, matching the `condition.logic` config shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionConfig {
    pub logic: String,
}

/// Loop edge parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// State field; loop exits when it becomes truthy
    pub condition_field: String,
    /// Where to go once the loop exits
    pub exit_to: String,
    /// Hard cap on visits to the loop origin
    pub max_iterations: u32,
}
