//! Observability sink interface
//!
//! The runtime reports run lifecycle, parameters, metrics, and artifacts
//! through the `Tracker` trait. Trackers must never break an execution:
//! implementations swallow their own failures, and `NoopTracker` is used
//! when no sink is configured.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde_json::Value;

/// A run-scoped observability sink.
///
/// Calls are best-effort: implementations log and continue on failure.
/// Nested runs (per-node tracking inside a workflow run) are supported by
/// `start_nested`.
pub trait Tracker: Send + Sync {
    /// Open a run; returns an opaque run id.
    fn start_run(&self, name: &str, inputs: &BTreeMap<String, Value>) -> Option<String>;

    /// Open a nested run under the active one.
    fn start_nested(&self, name: &str) -> Option<String> {
        let _ = name;
        None
    }

    fn log_param(&self, key: &str, value: &str);

    fn log_metric(&self, key: &str, value: f64);

    /// Attach a named artifact (JSON document or text).
    fn log_artifact(&self, name: &str, content: &Value);

    /// Close the run with a terminal status ("completed", "failed", …).
    fn end_run(&self, status: &str);
}

/// Tracker that drops everything. Used when observability is not
/// configured; keeps every call site unconditional.
#[derive(Debug, Default)]
pub struct NoopTracker;

impl Tracker for NoopTracker {
    fn start_run(&self, _name: &str, _inputs: &BTreeMap<String, Value>) -> Option<String> {
        None
    }

    fn log_param(&self, _key: &str, _value: &str) {}

    fn log_metric(&self, _key: &str, _value: f64) {}

    fn log_artifact(&self, _name: &str, _content: &Value) {}

    fn end_run(&self, _status: &str) {}
}

/// In-memory tracker capturing everything it is told.
///
/// Useful in tests and for embedding hosts that want to inspect run
/// telemetry without an external sink.
#[derive(Debug, Default)]
pub struct RecordingTracker {
    inner: Mutex<Recorded>,
}

#[derive(Debug, Default, Clone)]
pub struct Recorded {
    pub runs: Vec<(String, String)>,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub artifacts: BTreeMap<String, Value>,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn snapshot(&self) -> Recorded {
        self.inner.lock().expect("tracker lock").clone()
    }
}

impl Tracker for RecordingTracker {
    fn start_run(&self, name: &str, _inputs: &BTreeMap<String, Value>) -> Option<String> {
        let mut inner = self.inner.lock().expect("tracker lock");
        let run_id = format!("run-{}", inner.runs.len());
        inner.runs.push((run_id.clone(), name.to_string()));
        Some(run_id)
    }

    fn start_nested(&self, name: &str) -> Option<String> {
        self.start_run(name, &BTreeMap::new())
    }

    fn log_param(&self, key: &str, value: &str) {
        self.inner
            .lock()
            .expect("tracker lock")
            .params
            .insert(key.to_string(), value.to_string());
    }

    fn log_metric(&self, key: &str, value: f64) {
        self.inner
            .lock()
            .expect("tracker lock")
            .metrics
            .insert(key.to_string(), value);
    }

    fn log_artifact(&self, name: &str, content: &Value) {
        self.inner
            .lock()
            .expect("tracker lock")
            .artifacts
            .insert(name.to_string(), content.clone());
    }

    fn end_run(&self, _status: &str) {}
}
