//! Workflow config file loading.
//!
//! Accepts YAML (`.yaml`/`.yml`) or JSON (`.json`) and runs structural
//! validation before handing the config to the graph builder.

use std::path::Path;

use tracing::{debug, info};

use super::{validate_config, WorkflowConfig};
use crate::error::ConfigError;

/// Load and validate a workflow config file.
pub fn load_config(path: impl AsRef<Path>) -> Result<WorkflowConfig, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("Cannot read {}: {}", path.display(), e)))?;

    let config = parse_config(&raw, path.extension().and_then(|e| e.to_str()))?;
    validate_config(&config)?;

    info!(
        workflow = %config.flow.name,
        nodes = config.nodes.len(),
        edges = config.edges.len(),
        "Loaded workflow config"
    );
    Ok(config)
}

/// Parse a config document from a string.
///
/// `extension` selects the parser; YAML is the default since it is a JSON
/// superset.
pub fn parse_config(raw: &str, extension: Option<&str>) -> Result<WorkflowConfig, ConfigError> {
    let config: WorkflowConfig = match extension {
        Some("json") => serde_json::from_str(raw)
            .map_err(|e| ConfigError::Load(format!("Invalid JSON config: {}", e)))?,
        _ => serde_yaml::from_str(raw)
            .map_err(|e| ConfigError::Load(format!("Invalid YAML config: {}", e)))?,
    };

    if config.schema_version.trim().is_empty() {
        return Err(ConfigError::Validation(
            "schema_version must be present and non-empty".into(),
        ));
    }
    debug!(schema_version = %config.schema_version, "Parsed config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
schema_version: "1.0"
flow:
  name: echo
state:
  fields:
    topic:
      type: str
      required: true
    summary:
      type: str
      default: ""
nodes:
  - id: summarize
    prompt: "Summarize {topic}"
    output_schema:
      type: str
    outputs: [summary]
edges:
  - from: START
    to: summarize
  - from: summarize
    to: END
"#;

    #[test]
    fn test_parse_minimal_yaml() {
        let config = parse_config(MINIMAL, Some("yaml")).unwrap();
        assert_eq!(config.flow.name, "echo");
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.state.fields.len(), 2);
    }

    #[test]
    fn test_missing_schema_version_rejected() {
        let raw = MINIMAL.replace("schema_version: \"1.0\"", "schema_version: \"\"");
        let err = parse_config(&raw, Some("yaml")).unwrap_err();
        assert!(err.to_string().contains("schema_version"));
    }

    #[test]
    fn test_json_config_accepted() {
        let config = parse_config(MINIMAL, Some("yaml")).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let reparsed = parse_config(&json, Some("json")).unwrap();
        assert_eq!(reparsed.flow.name, "echo");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflow.yaml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.flow.name, "echo");

        let missing = load_config(dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(ConfigError::Load(_))));
    }
}
