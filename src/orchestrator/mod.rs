//! Orchestrator
//!
//! A registry client plus a connection-managing service that dispatches
//! workflow executions to live workers, singly or as a bounded-parallel
//! fan-out with per-call timeouts.

mod client;
pub mod filters;
mod service;

pub use client::OrchestratorClient;
pub use service::{
    Connection, ConnectionStatus, ExecutionOutcome, OrchestratorConfig, OrchestratorError,
    OrchestratorService, OutcomeStatus,
};
