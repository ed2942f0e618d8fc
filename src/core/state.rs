//! Workflow state construction and merging
//!
//! The state schema declared in the config is turned into a factory that
//! builds typed state instances: required fields are enforced, defaults
//! applied, and node output patches merged under schema control. A small
//! set of reserved extension keys (underscore-prefixed, notably the
//! `_loop_iteration_<node>` counters) bypasses the schema.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::StateSchemaConfig;
use crate::error::StateError;

/// Prefix of the per-node loop counters maintained by the scheduler.
pub const LOOP_ITERATION_PREFIX: &str = "_loop_iteration_";

/// State key tracking loop visits of `node_id`.
pub fn loop_iteration_key(node_id: &str) -> String {
    format!("{}{}", LOOP_ITERATION_PREFIX, node_id)
}

/// Whether a key is a reserved extension key (loop counters, tracker tags).
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with('_')
}

/// A patch produced by one node: declared output fields to new values.
pub type StatePatch = BTreeMap<String, Value>;

/// Truthiness of a JSON value, matching the loop and condition semantics:
/// null, false, 0, empty string/array/object are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Factory producing typed state instances for one workflow.
#[derive(Debug, Clone)]
pub struct StateFactory {
    schema: Arc<StateSchemaConfig>,
}

impl StateFactory {
    pub fn new(schema: StateSchemaConfig) -> Self {
        Self {
            schema: Arc::new(schema),
        }
    }

    pub fn schema(&self) -> &StateSchemaConfig {
        &self.schema
    }

    /// Build an initial state from workflow inputs.
    ///
    /// Required fields must be present, declared defaults fill the rest,
    /// and unknown non-reserved keys are rejected.
    pub fn build(&self, inputs: &BTreeMap<String, Value>) -> Result<StateInstance, StateError> {
        let mut values = BTreeMap::new();

        for (name, field) in &self.schema.fields {
            match inputs.get(name) {
                Some(value) => {
                    if !field.field_type.matches(value) {
                        return Err(StateError(format!(
                            "Field '{}' expects {} but got {}",
                            name,
                            field.field_type,
                            type_name(value)
                        )));
                    }
                    values.insert(name.clone(), value.clone());
                }
                None => {
                    if let Some(default) = &field.default {
                        values.insert(name.clone(), default.clone());
                    } else if field.required {
                        return Err(StateError(format!(
                            "Required field '{}' missing from inputs",
                            name
                        )));
                    }
                }
            }
        }

        for key in inputs.keys() {
            if !self.schema.fields.contains_key(key) && !is_reserved_key(key) {
                return Err(StateError(format!(
                    "Unknown input field '{}' (declared fields: {})",
                    key,
                    self.field_list()
                )));
            }
        }

        Ok(StateInstance {
            values,
            schema: Arc::clone(&self.schema),
        })
    }

    fn field_list(&self) -> String {
        self.schema
            .fields
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A mutable, schema-checked state owned by one execution.
#[derive(Debug, Clone)]
pub struct StateInstance {
    values: BTreeMap<String, Value>,
    schema: Arc<StateSchemaConfig>,
}

impl StateInstance {
    /// Top-level field lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Dotted-path lookup navigating into nested objects.
    pub fn get_path(&self, path: &str) -> Option<Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.values.get(first)?.clone();
        for part in parts {
            current = current.as_object()?.get(part)?.clone();
        }
        Some(current)
    }

    /// Declared field names, for error messages.
    pub fn declared_fields(&self) -> Vec<&str> {
        self.schema.fields.keys().map(|k| k.as_str()).collect()
    }

    /// Current values as a plain map (includes extension keys).
    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Merge a node patch into this state.
    ///
    /// Declared fields are type-checked; reserved extension keys pass
    /// through; anything else is rejected.
    pub fn merge(&mut self, patch: &StatePatch) -> Result<(), StateError> {
        for (key, value) in patch {
            if let Some(field) = self.schema.fields.get(key) {
                if !field.field_type.matches(value) {
                    return Err(StateError(format!(
                        "Patch for '{}' expects {} but got {}",
                        key,
                        field.field_type,
                        type_name(value)
                    )));
                }
                self.values.insert(key.clone(), value.clone());
            } else if is_reserved_key(key) {
                self.values.insert(key.clone(), value.clone());
            } else {
                return Err(StateError(format!(
                    "Patch writes unknown field '{}' (declared fields: {})",
                    key,
                    self.schema
                        .fields
                        .keys()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Current loop iteration count for a node (0 before the first visit).
    pub fn loop_iteration(&self, node_id: &str) -> u64 {
        self.values
            .get(&loop_iteration_key(node_id))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }

    /// Increment the loop counter for a node by exactly one.
    pub fn increment_loop_iteration(&mut self, node_id: &str) -> u64 {
        let next = self.loop_iteration(node_id) + 1;
        self.values
            .insert(loop_iteration_key(node_id), Value::from(next));
        next
    }

    /// Set a reserved extension key (tracker tags and the like).
    pub fn set_extension(&mut self, key: &str, value: Value) -> Result<(), StateError> {
        if !is_reserved_key(key) {
            return Err(StateError(format!(
                "Extension keys must start with '_': {}",
                key
            )));
        }
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldType, StateFieldConfig};
    use serde_json::json;

    fn schema() -> StateSchemaConfig {
        let mut fields = BTreeMap::new();
        fields.insert(
            "topic".to_string(),
            StateFieldConfig {
                field_type: FieldType::Str,
                required: true,
                default: None,
                description: None,
            },
        );
        fields.insert(
            "summary".to_string(),
            StateFieldConfig {
                field_type: FieldType::Str,
                required: false,
                default: Some(json!("")),
                description: None,
            },
        );
        fields.insert(
            "score".to_string(),
            StateFieldConfig {
                field_type: FieldType::Float,
                required: false,
                default: None,
                description: None,
            },
        );
        StateSchemaConfig { fields }
    }

    fn inputs(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_build_applies_defaults() {
        let factory = StateFactory::new(schema());
        let state = factory.build(&inputs(&[("topic", json!("ai"))])).unwrap();

        assert_eq!(state.get("topic"), Some(&json!("ai")));
        assert_eq!(state.get("summary"), Some(&json!("")));
        // Optional field with no default is simply absent
        assert_eq!(state.get("score"), None);
    }

    #[test]
    fn test_build_rejects_missing_required() {
        let factory = StateFactory::new(schema());
        let err = factory.build(&inputs(&[])).unwrap_err();
        assert!(err.to_string().contains("topic"));
    }

    #[test]
    fn test_build_rejects_wrong_type() {
        let factory = StateFactory::new(schema());
        let err = factory.build(&inputs(&[("topic", json!(42))])).unwrap_err();
        assert!(err.to_string().contains("expects str"));
    }

    #[test]
    fn test_build_rejects_unknown_field() {
        let factory = StateFactory::new(schema());
        let err = factory
            .build(&inputs(&[("topic", json!("ai")), ("bogus", json!(1))]))
            .unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_merge_type_checks_declared_fields() {
        let factory = StateFactory::new(schema());
        let mut state = factory.build(&inputs(&[("topic", json!("ai"))])).unwrap();

        let mut patch = StatePatch::new();
        patch.insert("summary".into(), json!("done"));
        state.merge(&patch).unwrap();
        assert_eq!(state.get("summary"), Some(&json!("done")));

        let mut bad = StatePatch::new();
        bad.insert("summary".into(), json!(3));
        assert!(state.merge(&bad).is_err());
    }

    #[test]
    fn test_merge_allows_reserved_keys() {
        let factory = StateFactory::new(schema());
        let mut state = factory.build(&inputs(&[("topic", json!("ai"))])).unwrap();

        let mut patch = StatePatch::new();
        patch.insert("_loop_iteration_step".into(), json!(2));
        patch.insert("_trace_tag".into(), json!("run-7"));
        state.merge(&patch).unwrap();

        assert_eq!(state.loop_iteration("step"), 2);
        assert_eq!(state.get("_trace_tag"), Some(&json!("run-7")));
    }

    #[test]
    fn test_merge_rejects_unknown_plain_key() {
        let factory = StateFactory::new(schema());
        let mut state = factory.build(&inputs(&[("topic", json!("ai"))])).unwrap();

        let mut patch = StatePatch::new();
        patch.insert("rogue".into(), json!(1));
        let err = state.merge(&patch).unwrap_err();
        assert!(err.to_string().contains("rogue"));
    }

    #[test]
    fn test_loop_counter_starts_at_zero_and_increments() {
        let factory = StateFactory::new(schema());
        let mut state = factory.build(&inputs(&[("topic", json!("ai"))])).unwrap();

        assert_eq!(state.loop_iteration("step"), 0);
        assert_eq!(state.increment_loop_iteration("step"), 1);
        assert_eq!(state.increment_loop_iteration("step"), 2);
        assert_eq!(state.loop_iteration("step"), 2);
    }

    #[test]
    fn test_get_path_navigates_objects() {
        let mut fields = schema().fields;
        fields.insert(
            "meta".to_string(),
            StateFieldConfig {
                field_type: FieldType::Dict(Box::new(FieldType::Str), Box::new(FieldType::Any)),
                required: false,
                default: Some(json!({"author": {"name": "alice"}})),
                description: None,
            },
        );
        let factory = StateFactory::new(StateSchemaConfig { fields });
        let state = factory.build(&inputs(&[("topic", json!("ai"))])).unwrap();

        assert_eq!(state.get_path("meta.author.name"), Some(json!("alice")));
        assert_eq!(state.get_path("meta.author.missing"), None);
        assert_eq!(state.get_path("topic"), Some(json!("ai")));
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(0.5)));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!([1])));
    }
}
