//! Workflow runtime
//!
//! The façade that loads a config, builds state, runs the graph, and
//! records the execution; plus quality gates and the node profiler.

pub mod gates;
pub mod profiler;
mod runner;

pub use gates::{
    check_gates, clear_deploy_block, get_failed_gates, is_deploy_blocked, take_action, GateResult,
};
pub use profiler::{Bottleneck, BottleneckAnalyzer, NodeTimings, ProfileSummary};
pub use runner::{RunResult, WorkflowRuntime};
