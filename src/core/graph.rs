//! Graph compilation
//!
//! Turns a validated workflow config into an executable graph: task nodes
//! keyed by id, one outgoing edge per node (linear, fork, conditional
//! router, or loop router), virtual START/END terminals, and the static
//! join in-degrees the scheduler uses as fork-join barriers.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use super::control_flow::{ConditionalRouter, LoopRouter};
use crate::config::{EdgeConfig, NodeConfig, WorkflowConfig, START};
use crate::error::{AgentFlowError, ConfigError};

/// Outgoing edge of a compiled node.
#[derive(Debug, Clone)]
pub enum EdgeKind {
    /// Single successor (possibly END)
    Linear(String),
    /// Parallel successors; the next common successor is the join barrier
    Fork(Vec<String>),
    /// First-true-wins conditional routing
    Conditional(ConditionalRouter),
    /// Bounded iteration back to the origin
    Loop(LoopRouter),
}

/// Executable workflow graph.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    workflow_name: String,
    nodes: BTreeMap<String, NodeConfig>,
    edges: HashMap<String, EdgeKind>,
    /// Successors of the virtual START terminal
    entry: Vec<String>,
    /// Static in-degree over linear and fork edges; barrier requirement
    join_indegree: HashMap<String, usize>,
    /// Nodes whose task is wrapped with a loop-counter increment
    loop_origins: HashSet<String>,
}

impl CompiledGraph {
    pub fn workflow_name(&self) -> &str {
        &self.workflow_name
    }

    pub fn node(&self, id: &str) -> Option<&NodeConfig> {
        self.nodes.get(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|k| k.as_str())
    }

    pub fn edge(&self, from: &str) -> Option<&EdgeKind> {
        self.edges.get(from)
    }

    pub fn entry(&self) -> &[String] {
        &self.entry
    }

    /// How many deliveries a node needs before it may run in a round.
    pub fn join_requirement(&self, id: &str) -> usize {
        self.join_indegree.get(id).copied().unwrap_or(1).max(1)
    }

    pub fn is_loop_origin(&self, id: &str) -> bool {
        self.loop_origins.contains(id)
    }
}

/// Compile a workflow config into an executable graph.
///
/// The config validator is expected to have run already; a failure here
/// indicates a validator bug.
pub fn compile_graph(config: &WorkflowConfig) -> Result<CompiledGraph, AgentFlowError> {
    if config.nodes.is_empty() {
        return Err(ConfigError::Validation(
            "Cannot compile a workflow with no nodes".into(),
        )
        .into());
    }
    if config.edges.is_empty() {
        return Err(ConfigError::Validation(
            "Cannot compile a workflow with no edges".into(),
        )
        .into());
    }

    let nodes: BTreeMap<String, NodeConfig> = config
        .nodes
        .iter()
        .map(|n| (n.id.clone(), n.clone()))
        .collect();

    let mut entry: Vec<String> = Vec::new();
    let mut edges: HashMap<String, EdgeKind> = HashMap::new();
    let mut loop_origins = HashSet::new();
    let mut join_indegree: HashMap<String, usize> = HashMap::new();

    for edge in &config.edges {
        let compiled = compile_edge(edge)?;

        if edge.from == START {
            if !entry.is_empty() {
                return Err(ConfigError::Validation(
                    "Multiple START edges; validator should have rejected this".into(),
                )
                .into());
            }
            let targets = match &compiled {
                EdgeKind::Linear(t) => vec![t.clone()],
                EdgeKind::Fork(ts) => ts.clone(),
                _ => {
                    return Err(ConfigError::Validation(
                        "START edge must be linear or fork".into(),
                    )
                    .into())
                }
            };
            for target in &targets {
                *join_indegree.entry(target.clone()).or_default() += 1;
            }
            entry = targets;
            continue;
        }

        if let EdgeKind::Loop(_) = compiled {
            loop_origins.insert(edge.from.clone());
        }

        // Static barrier accounting: only linear and fork deliveries are
        // guaranteed per visit; routers fire exactly one successor.
        match &compiled {
            EdgeKind::Linear(target) => {
                *join_indegree.entry(target.clone()).or_default() += 1;
            }
            EdgeKind::Fork(targets) => {
                for target in targets {
                    *join_indegree.entry(target.clone()).or_default() += 1;
                }
            }
            _ => {}
        }

        merge_outgoing(&mut edges, &edge.from, compiled)?;
    }

    if entry.is_empty() {
        return Err(ConfigError::Validation(
            "No START edge; validator should have rejected this".into(),
        )
        .into());
    }

    for id in nodes.keys() {
        if !edges.contains_key(id) {
            return Err(ConfigError::Validation(format!(
                "Node '{}' has no outgoing edge",
                id
            ))
            .into());
        }
    }

    debug!(
        workflow = %config.flow.name,
        nodes = nodes.len(),
        loops = loop_origins.len(),
        "Compiled workflow graph"
    );

    Ok(CompiledGraph {
        workflow_name: config.flow.name.clone(),
        nodes,
        edges,
        entry,
        join_indegree,
        loop_origins,
    })
}

fn compile_edge(edge: &EdgeConfig) -> Result<EdgeKind, AgentFlowError> {
    if let Some(to) = &edge.to {
        let targets: Vec<String> = to.targets().iter().map(|t| t.to_string()).collect();
        return Ok(if targets.len() == 1 {
            EdgeKind::Linear(targets.into_iter().next().expect("one target"))
        } else {
            EdgeKind::Fork(targets)
        });
    }

    if let Some(routes) = &edge.routes {
        let router = ConditionalRouter::new(routes.clone())?;
        return Ok(EdgeKind::Conditional(router));
    }

    if let Some(spec) = &edge.loop_spec {
        return Ok(EdgeKind::Loop(LoopRouter::new(edge.from.clone(), spec.clone())));
    }

    Err(ConfigError::Validation(format!(
        "Edge from '{}' has no target form",
        edge.from
    ))
    .into())
}

/// Combine multiple outgoing edges from one node. Plain targets merge
/// into a fork; routers cannot be combined with anything else.
fn merge_outgoing(
    edges: &mut HashMap<String, EdgeKind>,
    from: &str,
    new: EdgeKind,
) -> Result<(), AgentFlowError> {
    match edges.remove(from) {
        None => {
            edges.insert(from.to_string(), new);
            Ok(())
        }
        Some(existing) => match (existing, new) {
            (EdgeKind::Linear(a), EdgeKind::Linear(b)) => {
                edges.insert(from.to_string(), EdgeKind::Fork(vec![a, b]));
                Ok(())
            }
            (EdgeKind::Linear(a), EdgeKind::Fork(mut ts)) => {
                ts.insert(0, a);
                edges.insert(from.to_string(), EdgeKind::Fork(ts));
                Ok(())
            }
            (EdgeKind::Fork(mut ts), EdgeKind::Linear(b)) => {
                ts.push(b);
                edges.insert(from.to_string(), EdgeKind::Fork(ts));
                Ok(())
            }
            (EdgeKind::Fork(mut ts), EdgeKind::Fork(more)) => {
                ts.extend(more);
                edges.insert(from.to_string(), EdgeKind::Fork(ts));
                Ok(())
            }
            _ => Err(ConfigError::Validation(format!(
                "Node '{}' mixes router edges with other outgoing edges",
                from
            ))
            .into()),
        },
    }
}
