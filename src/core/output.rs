//! Output contract enforcement
//!
//! A node's declared output schema is compiled into a validator that
//! checks LLM output before it touches the state. Simple schemas wrap the
//! parsed value as `{result: value}`; object schemas require every
//! declared field. Nested objects are rejected at build time.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::config::{FieldType, OutputSchemaConfig};
use crate::error::OutputError;

/// Compiled output contract for one node.
#[derive(Debug, Clone)]
pub struct OutputValidator {
    /// Diagnostic name, `Output_<node_id>`
    model_name: String,
    shape: OutputShape,
}

#[derive(Debug, Clone)]
enum OutputShape {
    /// Simple value exposed under the reserved `result` key
    Simple(FieldType),
    /// Record with required, typed fields
    Object(Vec<(String, FieldType)>),
}

/// A validated output: field name to value mapping ready for state merge.
pub type ValidatedOutput = BTreeMap<String, Value>;

impl OutputValidator {
    /// Compile an output schema for a node.
    pub fn from_config(schema: &OutputSchemaConfig, node_id: &str) -> Result<Self, OutputError> {
        let model_name = format!("Output_{}", node_id);

        if schema.schema_type == "object" {
            let fields = schema.fields.as_deref().unwrap_or_default();
            if fields.is_empty() {
                return Err(OutputError::new(
                    &model_name,
                    "Object output schema requires a non-empty field list",
                ));
            }
            let compiled = fields
                .iter()
                .map(|f| (f.name.clone(), f.field_type.clone()))
                .collect();
            return Ok(Self {
                model_name,
                shape: OutputShape::Object(compiled),
            });
        }

        if schema.fields.is_some() {
            return Err(OutputError::new(
                &model_name,
                "Field lists are only valid for object output schemas",
            ));
        }

        let field_type: FieldType = schema
            .schema_type
            .parse()
            .map_err(|_| {
                OutputError::new(
                    &model_name,
                    format!("Unsupported output type '{}'", schema.schema_type),
                )
            })?;
        Ok(Self {
            model_name,
            shape: OutputShape::Simple(field_type),
        })
    }

    /// Diagnostic model name.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Whether this is a simple (single `result`) contract.
    pub fn is_simple(&self) -> bool {
        matches!(self.shape, OutputShape::Simple(_))
    }

    /// Declared field names (object schemas), or `["result"]` for simple.
    pub fn field_names(&self) -> Vec<&str> {
        match &self.shape {
            OutputShape::Simple(_) => vec!["result"],
            OutputShape::Object(fields) => fields.iter().map(|(n, _)| n.as_str()).collect(),
        }
    }

    /// A JSON-schema-flavored description of the contract, handed to the
    /// LLM provider so it can shape its structured output.
    pub fn describe(&self) -> Value {
        match &self.shape {
            OutputShape::Simple(t) => serde_json::json!({ "type": t.to_string() }),
            OutputShape::Object(fields) => {
                let props: serde_json::Map<String, Value> = fields
                    .iter()
                    .map(|(name, t)| (name.clone(), serde_json::json!({ "type": t.to_string() })))
                    .collect();
                serde_json::json!({ "type": "object", "fields": props })
            }
        }
    }

    /// Validate raw LLM output against the contract.
    ///
    /// Simple contracts accept either the bare value or an object with a
    /// single `result` key, so construct → serialize → construct is the
    /// identity.
    pub fn validate(&self, raw: &Value) -> Result<ValidatedOutput, OutputError> {
        match &self.shape {
            OutputShape::Simple(expected) => {
                let value = match raw {
                    Value::Object(map) if map.len() == 1 && map.contains_key("result") => {
                        map.get("result").expect("checked above")
                    }
                    other => other,
                };
                if !expected.matches(value) {
                    return Err(OutputError::new(
                        &self.model_name,
                        format!("Expected {} for 'result', got {}", expected, short(value)),
                    ));
                }
                Ok(BTreeMap::from([("result".to_string(), value.clone())]))
            }
            OutputShape::Object(fields) => {
                let map = raw.as_object().ok_or_else(|| {
                    OutputError::new(
                        &self.model_name,
                        format!("Expected object output, got {}", short(raw)),
                    )
                })?;

                let mut validated = BTreeMap::new();
                for (name, expected) in fields {
                    let value = map.get(name).ok_or_else(|| {
                        OutputError::new(
                            &self.model_name,
                            format!("Missing required field '{}'", name),
                        )
                    })?;
                    if !expected.matches(value) {
                        return Err(OutputError::new(
                            &self.model_name,
                            format!("Field '{}' expects {}, got {}", name, expected, short(value)),
                        ));
                    }
                    validated.insert(name.clone(), value.clone());
                }
                Ok(validated)
            }
        }
    }

    /// Serialize a validated output back to its wire form.
    pub fn serialize(&self, output: &ValidatedOutput) -> Value {
        Value::Object(output.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

fn short(value: &Value) -> String {
    let text = value.to_string();
    if text.len() > 60 {
        format!("{}…", &text[..60])
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFieldConfig;
    use serde_json::json;

    fn simple(schema_type: &str) -> OutputSchemaConfig {
        OutputSchemaConfig {
            schema_type: schema_type.into(),
            description: None,
            fields: None,
        }
    }

    fn object(fields: &[(&str, &str)]) -> OutputSchemaConfig {
        OutputSchemaConfig {
            schema_type: "object".into(),
            description: None,
            fields: Some(
                fields
                    .iter()
                    .map(|(name, t)| OutputFieldConfig {
                        name: name.to_string(),
                        field_type: t.parse().unwrap(),
                        description: None,
                    })
                    .collect(),
            ),
        }
    }

    #[test]
    fn test_simple_string_output_wrapped_as_result() {
        let validator = OutputValidator::from_config(&simple("str"), "write").unwrap();
        assert_eq!(validator.model_name(), "Output_write");

        let out = validator.validate(&json!("Hello world")).unwrap();
        assert_eq!(out.get("result"), Some(&json!("Hello world")));
    }

    #[test]
    fn test_simple_types_validated() {
        let cases = [
            ("int", json!(42), json!("x")),
            ("float", json!(95.5), json!("x")),
            ("bool", json!(true), json!(1)),
            ("str", json!("ok"), json!(123)),
        ];
        for (t, good, bad) in cases {
            let validator = OutputValidator::from_config(&simple(t), "n").unwrap();
            assert!(validator.validate(&good).is_ok(), "type {}", t);
            assert!(validator.validate(&bad).is_err(), "type {}", t);
        }
    }

    #[test]
    fn test_object_output_all_fields_required() {
        let validator =
            OutputValidator::from_config(&object(&[("article", "str"), ("word_count", "int")]), "w")
                .unwrap();

        let out = validator
            .validate(&json!({"article": "Test", "word_count": 100}))
            .unwrap();
        assert_eq!(out.get("article"), Some(&json!("Test")));
        assert_eq!(out.get("word_count"), Some(&json!(100)));

        let err = validator.validate(&json!({"article": "Test"})).unwrap_err();
        assert!(err.message.contains("word_count"));
    }

    #[test]
    fn test_object_output_type_mismatch() {
        let validator = OutputValidator::from_config(&object(&[("count", "int")]), "c").unwrap();
        let err = validator.validate(&json!({"count": "five"})).unwrap_err();
        assert!(err.message.contains("count"));
        assert!(err.message.contains("int"));
    }

    #[test]
    fn test_object_schema_requires_fields() {
        let schema = OutputSchemaConfig {
            schema_type: "object".into(),
            description: None,
            fields: Some(vec![]),
        };
        assert!(OutputValidator::from_config(&schema, "x").is_err());
    }

    #[test]
    fn test_nested_object_field_rejected_at_parse() {
        // "object" is not a valid field type, so nested records cannot be
        // declared in the first place
        assert!("object".parse::<FieldType>().is_err());
    }

    #[test]
    fn test_unknown_simple_type_rejected() {
        assert!(OutputValidator::from_config(&simple("tuple"), "x").is_err());
    }

    #[test]
    fn test_roundtrip_identity_simple() {
        let validator = OutputValidator::from_config(&simple("str"), "r").unwrap();
        let original = validator.validate(&json!("text")).unwrap();
        let wire = validator.serialize(&original);
        let reparsed = validator.validate(&wire).unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn test_roundtrip_identity_object() {
        let validator =
            OutputValidator::from_config(&object(&[("a", "str"), ("b", "int")]), "r").unwrap();
        let original = validator.validate(&json!({"a": "x", "b": 2})).unwrap();
        let wire = validator.serialize(&original);
        let reparsed = validator.validate(&wire).unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn test_describe_shapes() {
        let validator = OutputValidator::from_config(&simple("str"), "d").unwrap();
        assert_eq!(validator.describe(), json!({"type": "str"}));

        let validator = OutputValidator::from_config(&object(&[("a", "int")]), "d").unwrap();
        assert_eq!(
            validator.describe(),
            json!({"type": "object", "fields": {"a": {"type": "int"}}})
        );
    }

    #[test]
    fn test_list_output_type() {
        let validator = OutputValidator::from_config(&simple("list[str]"), "l").unwrap();
        assert!(validator.validate(&json!(["a", "b"])).is_ok());
        assert!(validator.validate(&json!("a")).is_err());
    }
}
