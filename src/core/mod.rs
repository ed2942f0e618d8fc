//! Core workflow engine
//!
//! Template resolution, the condition DSL, output contracts, typed state,
//! node execution, and the graph builder/interpreter.

pub mod control_flow;
pub mod graph;
pub mod node;
pub mod output;
pub mod scheduler;
pub mod state;
pub mod template;

pub use control_flow::{evaluate_condition, ConditionalRouter, LoopRouter};
pub use graph::{compile_graph, CompiledGraph, EdgeKind};
pub use node::{NodeExecutor, NodeOutcome};
pub use output::{OutputValidator, ValidatedOutput};
pub use scheduler::{cancellation, CancelHandle, ExecutionReport, GraphInterpreter, NodeVisit};
pub use state::{
    is_reserved_key, is_truthy, loop_iteration_key, StateFactory, StateInstance, StatePatch,
};
pub use template::{extract_variables, resolve_prompt, resolve_variable};
