//! Persistent record types
//!
//! Row-level structs shared by the repository traits and their SQLite
//! backend. Timestamps are UTC and serialize as RFC 3339 on the wire.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// One workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    pub config_snapshot: Option<Value>,
    pub inputs: Option<Value>,
    pub outputs: Option<Value>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub total_tokens: Option<i64>,
    pub total_cost: Option<f64>,
    pub bottleneck_info: Option<Value>,
}

impl ExecutionRecord {
    /// Fresh pending record for a new run.
    pub fn pending(id: impl Into<String>, workflow_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            workflow_name: workflow_name.into(),
            status: ExecutionStatus::Pending,
            config_snapshot: None,
            inputs: None,
            outputs: None,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: None,
            total_tokens: None,
            total_cost: None,
            bottleneck_info: None,
        }
    }

    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = Some(inputs);
        self
    }

    pub fn with_config_snapshot(mut self, snapshot: Value) -> Self {
        self.config_snapshot = Some(snapshot);
        self
    }
}

/// Terminal update applied when an execution finishes.
#[derive(Debug, Clone, Default)]
pub struct ExecutionCompletion {
    pub duration_seconds: f64,
    pub total_tokens: Option<i64>,
    pub total_cost: Option<f64>,
    pub outputs: Option<Value>,
    pub error_message: Option<String>,
    pub bottleneck_info: Option<Value>,
}

/// Append-only state snapshot taken after a node's patch merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStateRecord {
    pub execution_id: String,
    pub node_id: String,
    pub state_data: Value,
    pub created_at: DateTime<Utc>,
}

/// A deployment lease in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployment_id: String,
    pub deployment_name: String,
    pub host: String,
    pub port: u16,
    pub workflow_name: Option<String>,
    pub metadata: Option<Value>,
    pub ttl_seconds: i64,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl DeploymentRecord {
    /// A lease is alive while now < last_heartbeat + ttl.
    pub fn is_alive(&self) -> bool {
        self.is_alive_at(Utc::now())
    }

    pub fn is_alive_at(&self, now: DateTime<Utc>) -> bool {
        now < self.last_heartbeat + Duration::seconds(self.ttl_seconds)
    }
}

/// A namespaced memory row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub namespace_key: String,
    pub agent_id: String,
    pub workflow_id: Option<String>,
    pub node_id: Option<String>,
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Idempotency row for a processed webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventRecord {
    pub webhook_id: String,
    pub provider: String,
    pub processed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_status_roundtrip() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ExecutionStatus::parse("unknown"), None);
    }

    #[test]
    fn test_deployment_ttl_boundary() {
        let t0 = Utc::now();
        let lease = DeploymentRecord {
            deployment_id: "x".into(),
            deployment_name: "x".into(),
            host: "localhost".into(),
            port: 8000,
            workflow_name: None,
            metadata: None,
            ttl_seconds: 60,
            last_heartbeat: t0,
            registered_at: t0,
        };

        assert!(lease.is_alive_at(t0 + Duration::seconds(59)));
        assert!(!lease.is_alive_at(t0 + Duration::seconds(60)));
        assert!(!lease.is_alive_at(t0 + Duration::seconds(120)));
    }

    #[test]
    fn test_pending_record_defaults() {
        let record = ExecutionRecord::pending("id-1", "flow");
        assert_eq!(record.status, ExecutionStatus::Pending);
        assert!(record.completed_at.is_none());
        assert!(record.outputs.is_none());
    }
}
