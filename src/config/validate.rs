//! Structural validation of workflow configs.
//!
//! Every rule here is checked before graph compilation: node/edge
//! presence, a single START edge, reference integrity, default routes on
//! conditionals, loop fields, and graph connectivity (every node is
//! reachable from START and can reach END).

use std::collections::{HashMap, HashSet, VecDeque};

use super::{EdgeConfig, WorkflowConfig, END, START};
use crate::error::ConfigError;

/// Validate a parsed workflow config.
pub fn validate_config(config: &WorkflowConfig) -> Result<(), ConfigError> {
    if config.nodes.is_empty() {
        return Err(ConfigError::Validation("Workflow has no nodes".into()));
    }
    if config.edges.is_empty() {
        return Err(ConfigError::Validation("Workflow has no edges".into()));
    }

    let mut node_ids = HashSet::new();
    for node in &config.nodes {
        if !node_ids.insert(node.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate node id: {}",
                node.id
            )));
        }
        if node.id == START || node.id == END {
            return Err(ConfigError::Validation(format!(
                "Node id '{}' is reserved",
                node.id
            )));
        }
        if node.outputs.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Node '{}' declares no output fields",
                node.id
            )));
        }
        for field in &node.outputs {
            if !config.state.fields.contains_key(field) {
                return Err(ConfigError::Validation(format!(
                    "Node '{}' outputs to undeclared state field '{}'",
                    node.id, field
                )));
            }
        }
    }

    let start_edges = config.edges.iter().filter(|e| e.from == START).count();
    if start_edges == 0 {
        return Err(ConfigError::Validation("No START edge found".into()));
    }
    if start_edges > 1 {
        return Err(ConfigError::Validation(format!(
            "Expected exactly one START edge, found {}",
            start_edges
        )));
    }

    for edge in &config.edges {
        validate_edge(config, edge, &node_ids)?;
    }

    validate_connectivity(config, &node_ids)?;
    Ok(())
}

fn validate_edge(
    config: &WorkflowConfig,
    edge: &EdgeConfig,
    node_ids: &HashSet<&str>,
) -> Result<(), ConfigError> {
    let forms =
        [edge.to.is_some(), edge.routes.is_some(), edge.loop_spec.is_some()];
    if forms.iter().filter(|f| **f).count() != 1 {
        return Err(ConfigError::Validation(format!(
            "Edge from '{}' must set exactly one of to/routes/loop",
            edge.from
        )));
    }

    if edge.from != START && !node_ids.contains(edge.from.as_str()) {
        return Err(ConfigError::Validation(format!(
            "Edge references unknown node '{}'",
            edge.from
        )));
    }

    let check_target = |target: &str| -> Result<(), ConfigError> {
        if target != END && !node_ids.contains(target) {
            return Err(ConfigError::Validation(format!(
                "Edge from '{}' targets unknown node '{}'",
                edge.from, target
            )));
        }
        Ok(())
    };

    if let Some(to) = &edge.to {
        for target in to.targets() {
            check_target(target)?;
        }
    }

    if let Some(routes) = &edge.routes {
        let defaults = routes
            .iter()
            .filter(|r| r.condition.logic.trim() == "default")
            .count();
        if defaults != 1 {
            return Err(ConfigError::Validation(format!(
                "Conditional edge from '{}' needs exactly one default route, found {}",
                edge.from, defaults
            )));
        }
        for route in routes {
            check_target(&route.to)?;
        }
    }

    if let Some(spec) = &edge.loop_spec {
        if edge.from == START {
            return Err(ConfigError::Validation("START cannot be a loop origin".into()));
        }
        if !config.state.fields.contains_key(&spec.condition_field) {
            return Err(ConfigError::Validation(format!(
                "Loop on '{}' references undeclared state field '{}'",
                edge.from, spec.condition_field
            )));
        }
        check_target(&spec.exit_to)?;
        if spec.max_iterations == 0 {
            return Err(ConfigError::Validation(format!(
                "Loop on '{}' must allow at least one iteration",
                edge.from
            )));
        }
    }

    Ok(())
}

/// Every node must be reachable from START and must have a path to END.
fn validate_connectivity(
    config: &WorkflowConfig,
    node_ids: &HashSet<&str>,
) -> Result<(), ConfigError> {
    // Successor map over all edge kinds. Loop edges contribute both the
    // back-edge to the origin and the exit target.
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &config.edges {
        let entry = successors.entry(edge.from.as_str()).or_default();
        if let Some(to) = &edge.to {
            entry.extend(to.targets());
        }
        if let Some(routes) = &edge.routes {
            entry.extend(routes.iter().map(|r| r.to.as_str()));
        }
        if let Some(spec) = &edge.loop_spec {
            entry.push(edge.from.as_str());
            entry.push(spec.exit_to.as_str());
        }
    }

    let reachable = traverse(START, &successors);
    for id in node_ids {
        if !reachable.contains(id) {
            return Err(ConfigError::Validation(format!(
                "Node '{}' is not reachable from START",
                id
            )));
        }
    }

    // Reverse reachability from END.
    let mut predecessors: HashMap<&str, Vec<&str>> = HashMap::new();
    for (from, targets) in &successors {
        for target in targets {
            predecessors.entry(target).or_default().push(from);
        }
    }
    let reaches_end = traverse(END, &predecessors);
    for id in node_ids {
        if !reaches_end.contains(id) {
            return Err(ConfigError::Validation(format!(
                "Node '{}' has no path to END",
                id
            )));
        }
    }

    Ok(())
}

fn traverse<'a>(root: &'a str, adjacency: &HashMap<&'a str, Vec<&'a str>>) -> HashSet<&'a str> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([root]);
    while let Some(current) = queue.pop_front() {
        if !seen.insert(current) {
            continue;
        }
        if let Some(next) = adjacency.get(current) {
            queue.extend(next.iter().copied());
        }
    }
    seen
}
