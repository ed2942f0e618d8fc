//! Workflow runtime façade
//!
//! One entry point that loads and validates config, builds the initial
//! state, compiles and runs the graph, and surfaces final outputs. Every
//! run is recorded: an execution row moves pending → running → terminal,
//! per-node state snapshots are appended, token totals and the profiler
//! summary land on the completion row, and configured quality gates are
//! applied to the post-run metrics.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

use super::gates::{check_gates, take_action};
use super::profiler::{BottleneckAnalyzer, ProfileSummary};
use crate::config::{load_config, validate_config, WorkflowConfig};
use crate::core::{compile_graph, GraphInterpreter, NodeExecutor, StateFactory};
use crate::error::AgentFlowError;
use crate::llm::{LlmProvider, TokenUsage};
use crate::observability::{NoopTracker, Tracker};
use crate::sandbox::CodeExecutor;
use crate::storage::{
    ExecutionCompletion, ExecutionRecord, ExecutionRepository, ExecutionStateRepository,
    ExecutionStatus,
};

/// Outcome of a completed workflow run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub execution_id: String,
    /// Values of every state field some node declared as an output
    pub outputs: BTreeMap<String, Value>,
    /// Full final state, extension keys included
    pub final_state: BTreeMap<String, Value>,
    pub usage: TokenUsage,
    pub profile: ProfileSummary,
}

/// The workflow runtime: wires the engine to providers, persistence, and
/// observability.
pub struct WorkflowRuntime {
    llm: Arc<dyn LlmProvider>,
    code: Option<Arc<dyn CodeExecutor>>,
    executions: Option<Arc<dyn ExecutionRepository>>,
    states: Option<Arc<dyn ExecutionStateRepository>>,
    tracker: Arc<dyn Tracker>,
}

impl WorkflowRuntime {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            code: None,
            executions: None,
            states: None,
            tracker: Arc::new(NoopTracker),
        }
    }

    pub fn with_code_executor(mut self, code: Arc<dyn CodeExecutor>) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_execution_repository(mut self, repo: Arc<dyn ExecutionRepository>) -> Self {
        self.executions = Some(repo);
        self
    }

    pub fn with_state_repository(mut self, repo: Arc<dyn ExecutionStateRepository>) -> Self {
        self.states = Some(repo);
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn Tracker>) -> Self {
        self.tracker = tracker;
        self
    }

    /// Load a config file and run it.
    pub async fn run(
        &self,
        config_path: impl AsRef<Path>,
        inputs: BTreeMap<String, Value>,
    ) -> Result<RunResult, AgentFlowError> {
        let config = load_config(config_path)?;
        self.run_config(config, inputs, None).await
    }

    /// Synchronous wrapper around [`run`](Self::run) for callers without a
    /// runtime. Must not be invoked from inside a tokio context.
    pub fn run_blocking(
        &self,
        config_path: impl AsRef<Path>,
        inputs: BTreeMap<String, Value>,
    ) -> Result<RunResult, AgentFlowError> {
        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| crate::error::ConfigError::Load(format!("Tokio runtime: {}", e)))?;
        runtime.block_on(self.run(config_path, inputs))
    }

    /// Run an already-parsed config, optionally under a cancellation
    /// signal.
    pub async fn run_config(
        &self,
        config: WorkflowConfig,
        inputs: BTreeMap<String, Value>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<RunResult, AgentFlowError> {
        validate_config(&config)?;

        let factory = StateFactory::new(config.state.clone());
        let initial = factory.build(&inputs)?;
        let graph = compile_graph(&config)?;

        let execution_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        if let Some(repo) = &self.executions {
            let record = ExecutionRecord::pending(&execution_id, &config.flow.name)
                .with_inputs(Value::Object(
                    inputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                ))
                .with_config_snapshot(serde_json::to_value(&config).unwrap_or(Value::Null));
            repo.add(record).await?;
            repo.update_status(&execution_id, ExecutionStatus::Running)
                .await?;
        }

        self.tracker.start_run(&config.flow.name, &inputs);
        self.tracker.log_param("workflow_name", &config.flow.name);
        if let Some(version) = &config.flow.version {
            self.tracker.log_param("workflow_version", version);
        }
        info!(workflow = %config.flow.name, execution_id = %execution_id, "Starting workflow run");

        let profiler = BottleneckAnalyzer::new();
        let mut executor = NodeExecutor::new(Arc::clone(&self.llm));
        if let Some(code) = &self.code {
            executor = executor.with_code_executor(Arc::clone(code));
        }

        let interpreter = GraphInterpreter::new(&graph, &executor, &config.config, &*self.tracker)
            .with_profiler(&profiler);

        let report = match interpreter.run(initial.clone(), cancel).await {
            Ok(report) => report,
            Err(err) => {
                let status = err.terminal_status();
                error!(workflow = %config.flow.name, execution_id = %execution_id, error = %err, "Workflow run failed");
                if let Some(repo) = &self.executions {
                    let terminal = if status == "cancelled" {
                        ExecutionStatus::Cancelled
                    } else {
                        ExecutionStatus::Failed
                    };
                    repo.update_completion(
                        &execution_id,
                        terminal,
                        ExecutionCompletion {
                            duration_seconds: started.elapsed().as_secs_f64(),
                            error_message: Some(err.to_string()),
                            ..Default::default()
                        },
                    )
                    .await?;
                }
                self.tracker.end_run(status);
                return Err(err);
            }
        };

        // Replay merge order to persist the per-node snapshot history.
        if let Some(states) = &self.states {
            let mut replayed = initial;
            for visit in &report.visits {
                replayed.merge(&visit.patch)?;
                let snapshot = Value::Object(
                    replayed
                        .as_map()
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                );
                states.save(&execution_id, &visit.node_id, snapshot).await?;
            }
        }

        let duration_seconds = started.elapsed().as_secs_f64();
        let profile = profiler.get_summary();

        let outputs: BTreeMap<String, Value> = config
            .output_fields()
            .into_iter()
            .filter_map(|field| report.state.get(&field).map(|v| (field, v.clone())))
            .collect();

        if let Some(repo) = &self.executions {
            repo.update_completion(
                &execution_id,
                ExecutionStatus::Completed,
                ExecutionCompletion {
                    duration_seconds,
                    total_tokens: Some(report.usage.total_tokens as i64),
                    total_cost: report.usage.cost_usd,
                    outputs: Some(Value::Object(
                        outputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    )),
                    error_message: None,
                    bottleneck_info: serde_json::to_value(&profile).ok(),
                },
            )
            .await?;
        }

        self.tracker.log_metric("duration_seconds", duration_seconds);
        self.tracker
            .log_metric("total_tokens", report.usage.total_tokens as f64);
        if let Some(cost) = report.usage.cost_usd {
            self.tracker.log_metric("total_cost", cost);
        }
        if let Ok(profile_json) = serde_json::to_value(&profile) {
            self.tracker.log_artifact("profile", &profile_json);
        }
        self.tracker.end_run("completed");

        // Quality gates run against the post-run metric map; the `fail`
        // policy surfaces after the execution row is already terminal.
        if let Some(gates) = &config.config.gates {
            let mut metrics = HashMap::new();
            metrics.insert("duration_seconds".to_string(), duration_seconds);
            metrics.insert("duration_ms".to_string(), duration_seconds * 1000.0);
            metrics.insert(
                "total_tokens".to_string(),
                report.usage.total_tokens as f64,
            );
            if let Some(cost) = report.usage.cost_usd {
                metrics.insert("cost_usd".to_string(), cost);
            }
            let results = check_gates(&metrics, gates);
            take_action(&results, gates.on_fail, &config.flow.name)?;
        }

        info!(
            workflow = %config.flow.name,
            execution_id = %execution_id,
            supersteps = report.supersteps,
            total_tokens = report.usage.total_tokens,
            "Workflow run completed"
        );

        Ok(RunResult {
            execution_id,
            outputs,
            final_state: report.state.as_map().clone(),
            usage: report.usage,
            profile,
        })
    }
}
