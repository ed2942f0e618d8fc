//! Quality gates
//!
//! Post-run metric thresholds with three policies: `warn` logs, `fail`
//! raises an aggregated error, and `block_deploy` flips a per-context
//! flag that deploy tooling consults before shipping a workflow.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use tracing::{error, warn};

use crate::config::{GatePolicy, GateSpec, GatesSpec};
use crate::error::GateError;

/// Outcome of checking a single gate.
#[derive(Debug, Clone)]
pub struct GateResult {
    pub metric: String,
    pub passed: bool,
    pub actual: Option<f64>,
    pub threshold: Option<f64>,
    pub message: String,
}

/// Check every configured gate against a metric map.
///
/// Metric names match exactly, with an `_avg` suffix, or with an `avg_`
/// prefix, so aggregated metrics satisfy gates declared on the base name.
pub fn check_gates(metrics: &HashMap<String, f64>, spec: &GatesSpec) -> Vec<GateResult> {
    spec.gates.iter().map(|gate| check_gate(metrics, gate)).collect()
}

fn check_gate(metrics: &HashMap<String, f64>, gate: &GateSpec) -> GateResult {
    let value = lookup_metric(metrics, &gate.metric);

    let Some(actual) = value else {
        return GateResult {
            metric: gate.metric.clone(),
            passed: false,
            actual: None,
            threshold: gate.max.or(gate.min),
            message: format!("Metric '{}' not found", gate.metric),
        };
    };

    if let Some(max) = gate.max {
        if actual > max {
            return GateResult {
                metric: gate.metric.clone(),
                passed: false,
                actual: Some(actual),
                threshold: Some(max),
                message: format!("{} = {} exceeds maximum {}", gate.metric, actual, max),
            };
        }
    }
    if let Some(min) = gate.min {
        if actual < min {
            return GateResult {
                metric: gate.metric.clone(),
                passed: false,
                actual: Some(actual),
                threshold: Some(min),
                message: format!("{} = {} below minimum {}", gate.metric, actual, min),
            };
        }
    }

    GateResult {
        metric: gate.metric.clone(),
        passed: true,
        actual: Some(actual),
        threshold: gate.max.or(gate.min),
        message: "Passed".into(),
    }
}

fn lookup_metric(metrics: &HashMap<String, f64>, name: &str) -> Option<f64> {
    metrics
        .get(name)
        .or_else(|| metrics.get(&format!("{}_avg", name)))
        .or_else(|| metrics.get(&format!("avg_{}", name)))
        .copied()
}

/// Apply the configured policy to a set of gate results.
///
/// `context` names the workflow (or deploy target) the results belong to;
/// it keys the block-deploy flags.
pub fn take_action(
    results: &[GateResult],
    policy: GatePolicy,
    context: &str,
) -> Result<(), GateError> {
    let failed: Vec<&GateResult> = results.iter().filter(|r| !r.passed).collect();
    if failed.is_empty() {
        return Ok(());
    }

    match policy {
        GatePolicy::Warn => {
            for result in &failed {
                warn!(context, metric = %result.metric, "Quality gate failed: {}", result.message);
            }
            Ok(())
        }
        GatePolicy::Fail => {
            let details: Vec<String> = failed
                .iter()
                .map(|r| format!("{}: {}", r.metric, r.message))
                .collect();
            error!(context, failed = failed.len(), "Quality gates failed");
            Err(GateError {
                message: format!("Quality gates failed. Failed gates: {}", details.join("; ")),
                failed_metrics: failed.iter().map(|r| r.metric.clone()).collect(),
            })
        }
        GatePolicy::BlockDeploy => {
            let metrics: Vec<String> = failed.iter().map(|r| r.metric.clone()).collect();
            warn!(context, metrics = ?metrics, "Quality gates failed; blocking deploy");
            blocks()
                .lock()
                .expect("deploy block lock")
                .insert(context.to_string(), metrics);
            Ok(())
        }
    }
}

/// Whether a context is currently blocked from deploying.
pub fn is_deploy_blocked(context: &str) -> bool {
    blocks()
        .lock()
        .expect("deploy block lock")
        .contains_key(context)
}

/// Metric names that caused the block, if any.
pub fn get_failed_gates(context: &str) -> Vec<String> {
    blocks()
        .lock()
        .expect("deploy block lock")
        .get(context)
        .cloned()
        .unwrap_or_default()
}

/// Clear a context's deploy block.
pub fn clear_deploy_block(context: &str) {
    blocks().lock().expect("deploy block lock").remove(context);
}

fn blocks() -> &'static Mutex<HashMap<String, Vec<String>>> {
    static BLOCKS: OnceLock<Mutex<HashMap<String, Vec<String>>>> = OnceLock::new();
    BLOCKS.get_or_init(|| Mutex::new(HashMap::new()))
}
