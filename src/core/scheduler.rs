//! Graph interpretation
//!
//! Drives a compiled graph in supersteps: every ready task runs
//! concurrently, their patches merge into the shared state in ascending
//! node-id order (deterministic regardless of interleaving), and routing
//! happens against the fully merged state. A node with several fork or
//! linear in-edges waits until all of them have delivered in the current
//! round, which is the fork-join barrier.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use super::graph::{CompiledGraph, EdgeKind};
use super::node::{NodeExecutor, NodeOutcome};
use super::state::{loop_iteration_key, StateInstance, StatePatch};
use crate::config::{GlobalConfig, END};
use crate::error::{AgentFlowError, NodeError, SchedulerError};
use crate::llm::TokenUsage;
use crate::observability::Tracker;
use crate::runtime::profiler::BottleneckAnalyzer;

/// Cancellation handle for a running workflow.
///
/// Cancelling lets in-flight tasks finish their current call; no new
/// round is scheduled afterwards.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Create a linked cancel handle and signal receiver.
pub fn cancellation() -> (CancelHandle, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, rx)
}

/// One node visit in merge order, for state snapshot replay.
#[derive(Debug, Clone)]
pub struct NodeVisit {
    pub node_id: String,
    pub patch: StatePatch,
}

/// Result of driving a graph to completion.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Final state after all merges
    pub state: StateInstance,
    /// Number of superstep rounds executed
    pub supersteps: usize,
    /// Aggregated token usage across all nodes
    pub usage: TokenUsage,
    /// Every node visit with its effective patch, in merge order
    pub visits: Vec<NodeVisit>,
}

/// Interprets a compiled graph against a node executor.
pub struct GraphInterpreter<'a> {
    graph: &'a CompiledGraph,
    executor: &'a NodeExecutor,
    global: &'a GlobalConfig,
    tracker: &'a dyn Tracker,
    profiler: Option<&'a BottleneckAnalyzer>,
}

impl<'a> GraphInterpreter<'a> {
    pub fn new(
        graph: &'a CompiledGraph,
        executor: &'a NodeExecutor,
        global: &'a GlobalConfig,
        tracker: &'a dyn Tracker,
    ) -> Self {
        Self {
            graph,
            executor,
            global,
            tracker,
            profiler: None,
        }
    }

    pub fn with_profiler(mut self, profiler: &'a BottleneckAnalyzer) -> Self {
        self.profiler = Some(profiler);
        self
    }

    /// Run the workflow to completion, honoring the workflow timeout.
    pub async fn run(
        &self,
        initial: StateInstance,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ExecutionReport, AgentFlowError> {
        let timeout = self.global.engine.workflow_timeout;
        match tokio::time::timeout(timeout, self.run_inner(initial, cancel)).await {
            Ok(result) => result,
            Err(_) => Err(SchedulerError::Timeout(timeout).into()),
        }
    }

    async fn run_inner(
        &self,
        initial: StateInstance,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ExecutionReport, AgentFlowError> {
        let semaphore = Arc::new(Semaphore::new(self.global.engine.fork_parallelism));

        let mut state = initial;
        let mut visits: Vec<NodeVisit> = Vec::new();
        let mut usage = TokenUsage::default();
        let mut supersteps = 0;
        let mut end_reached = false;

        // Deliveries per node within the current round; a node becomes
        // ready once the count meets its join requirement.
        let mut arrivals: HashMap<String, usize> = HashMap::new();
        let mut frontier: Vec<String> = Vec::new();

        for target in self.graph.entry() {
            self.deliver(target, &mut arrivals, &mut frontier, &mut end_reached);
        }

        while !frontier.is_empty() {
            if supersteps >= self.global.engine.max_supersteps {
                return Err(SchedulerError::MaxSupersteps(supersteps).into());
            }
            if let Some(cancel) = &cancel {
                if *cancel.borrow() {
                    info!(
                        workflow = %self.graph.workflow_name(),
                        "Cancellation observed, stopping scheduler"
                    );
                    return Err(SchedulerError::Cancelled.into());
                }
            }

            // Deterministic task order within the round.
            frontier.sort();
            frontier.dedup();
            debug!(round = supersteps, tasks = ?frontier, "Running superstep");

            let outcomes = join_all(frontier.iter().map(|node_id| {
                let semaphore = Arc::clone(&semaphore);
                let state = &state;
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore open");
                    let outcome = self.execute_single(node_id, state).await;
                    (node_id.clone(), outcome)
                }
            }))
            .await;

            // Merge in ascending node-id order (the frontier is sorted and
            // join_all preserves order), so overlapping writes resolve the
            // same way regardless of task interleaving.
            for (node_id, outcome) in outcomes {
                let outcome = outcome?;
                let mut effective = outcome.patch;
                state.merge(&effective)?;
                if self.graph.is_loop_origin(&node_id) {
                    let next = state.increment_loop_iteration(&node_id);
                    effective.insert(loop_iteration_key(&node_id), serde_json::Value::from(next));
                }
                if let Some(u) = &outcome.usage {
                    usage.add(u);
                }
                visits.push(NodeVisit {
                    node_id,
                    patch: effective,
                });
            }

            // Route against the fully merged round state.
            let completed: Vec<String> = std::mem::take(&mut frontier);
            for node_id in &completed {
                let edge = self
                    .graph
                    .edge(node_id)
                    .ok_or_else(|| SchedulerError::MissingEdge(node_id.clone()))?;
                match edge {
                    EdgeKind::Linear(target) => {
                        self.deliver(target, &mut arrivals, &mut frontier, &mut end_reached);
                    }
                    EdgeKind::Fork(targets) => {
                        for target in targets {
                            self.deliver(target, &mut arrivals, &mut frontier, &mut end_reached);
                        }
                    }
                    EdgeKind::Conditional(router) => {
                        let target = router.route(&state);
                        debug!(node = %node_id, target = %target, "Conditional route");
                        self.deliver(&target, &mut arrivals, &mut frontier, &mut end_reached);
                    }
                    EdgeKind::Loop(router) => {
                        let target = router.route(&state);
                        debug!(node = %node_id, target = %target, "Loop route");
                        self.deliver(&target, &mut arrivals, &mut frontier, &mut end_reached);
                    }
                }
            }

            supersteps += 1;
        }

        if !end_reached {
            warn!(
                workflow = %self.graph.workflow_name(),
                "Scheduler drained without reaching END"
            );
        }

        // Deliveries left behind mean a join barrier never completed.
        let mut stuck: Vec<&String> =
            arrivals.iter().filter(|(_, n)| **n > 0).map(|(k, _)| k).collect();
        if !stuck.is_empty() {
            stuck.sort();
            return Err(SchedulerError::IncompleteJoin(format!("{:?}", stuck)).into());
        }

        info!(
            workflow = %self.graph.workflow_name(),
            supersteps,
            nodes_run = visits.len(),
            total_tokens = usage.total_tokens,
            "Workflow execution finished"
        );

        Ok(ExecutionReport {
            state,
            supersteps,
            usage,
            visits,
        })
    }

    /// Run one node with the per-node timeout, recording its duration.
    async fn execute_single(
        &self,
        node_id: &str,
        state: &StateInstance,
    ) -> Result<NodeOutcome, NodeError> {
        let node = self
            .graph
            .node(node_id)
            .ok_or_else(|| NodeError::new(node_id, "Unknown node id in frontier"))?;

        let started = Instant::now();
        let result = tokio::time::timeout(
            self.global.engine.node_timeout,
            self.executor.execute(node, state, self.global, self.tracker),
        )
        .await
        .unwrap_or_else(|_| {
            Err(NodeError::retryable(
                node_id,
                format!("Timed out after {:?}", self.global.engine.node_timeout),
            ))
        });

        if let Some(profiler) = self.profiler {
            profiler.record_node(node_id, started.elapsed().as_secs_f64() * 1000.0);
        }
        result
    }

    fn deliver(
        &self,
        target: &str,
        arrivals: &mut HashMap<String, usize>,
        frontier: &mut Vec<String>,
        end_reached: &mut bool,
    ) {
        if target == END {
            *end_reached = true;
            return;
        }
        let count = arrivals.entry(target.to_string()).or_default();
        *count += 1;
        if *count >= self.graph.join_requirement(target) {
            *count = 0;
            frontier.push(target.to_string());
        }
    }
}
