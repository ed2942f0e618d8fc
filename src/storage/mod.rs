//! Persistence layer
//!
//! Typed repository traits over a relational store, plus the SQLite
//! backend used by default. Every service (runtime, registry, webhooks,
//! memory) depends only on the traits.

mod records;
mod sqlite;

pub use records::{
    DeploymentRecord, ExecutionCompletion, ExecutionRecord, ExecutionStateRecord, ExecutionStatus,
    MemoryRecord, WebhookEventRecord,
};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::StorageError;

/// CRUD over workflow execution records.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn add(&self, record: ExecutionRecord) -> Result<(), StorageError>;

    async fn get(&self, id: &str) -> Result<Option<ExecutionRecord>, StorageError>;

    async fn list_by_workflow(
        &self,
        workflow_name: &str,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>, StorageError>;

    async fn list_all(&self, limit: u32) -> Result<Vec<ExecutionRecord>, StorageError>;

    async fn update_status(&self, id: &str, status: ExecutionStatus) -> Result<(), StorageError>;

    /// Record the terminal status plus completion details in one write.
    async fn update_completion(
        &self,
        id: &str,
        status: ExecutionStatus,
        completion: ExecutionCompletion,
    ) -> Result<(), StorageError>;
}

/// Append-only per-node state snapshots.
#[async_trait]
pub trait ExecutionStateRepository: Send + Sync {
    async fn save(
        &self,
        execution_id: &str,
        node_id: &str,
        state_data: Value,
    ) -> Result<(), StorageError>;

    async fn get_latest(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionStateRecord>, StorageError>;

    async fn get_history(
        &self,
        execution_id: &str,
    ) -> Result<Vec<ExecutionStateRecord>, StorageError>;
}

/// TTL-leased deployment rows for the registry.
#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    /// Insert or update by `deployment_id` and return the stored row.
    ///
    /// Last writer wins for host/port/ttl/metadata; `registered_at` is
    /// preserved on update. The backend must make this atomic per row.
    async fn upsert(&self, record: DeploymentRecord) -> Result<DeploymentRecord, StorageError>;

    async fn get(&self, id: &str) -> Result<Option<DeploymentRecord>, StorageError>;

    async fn list_all(&self, include_dead: bool) -> Result<Vec<DeploymentRecord>, StorageError>;

    /// Refresh `last_heartbeat` to now; `NotFound` if the id is unknown.
    async fn update_heartbeat(&self, id: &str) -> Result<DateTime<Utc>, StorageError>;

    /// Remove a lease; `NotFound` if the id is unknown.
    async fn delete(&self, id: &str) -> Result<(), StorageError>;

    /// Remove every expired lease, returning how many were dropped.
    async fn delete_expired(&self) -> Result<u64, StorageError>;

    /// Live deployments whose metadata satisfies every filter.
    async fn query_by_metadata(
        &self,
        filters: &serde_json::Map<String, Value>,
    ) -> Result<Vec<DeploymentRecord>, StorageError>;

    /// Rows whose last heartbeat is within `cutoff_seconds`, independent
    /// of their declared TTL.
    async fn get_active(&self, cutoff_seconds: i64) -> Result<Vec<DeploymentRecord>, StorageError>;
}

/// Namespaced KV rows backing the memory store.
#[async_trait]
pub trait MemoryRepository: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn set(
        &self,
        namespace_key: &str,
        value_json: &str,
        agent_id: &str,
        workflow_id: Option<&str>,
        node_id: Option<&str>,
        key: &str,
    ) -> Result<(), StorageError>;

    async fn get(&self, namespace_key: &str) -> Result<Option<String>, StorageError>;

    /// Returns whether a row was actually deleted.
    async fn delete(&self, namespace_key: &str) -> Result<bool, StorageError>;

    /// `(key, value_json)` pairs for an agent, filtered by user-key prefix.
    async fn list(
        &self,
        agent_id: &str,
        prefix: &str,
    ) -> Result<Vec<(String, String)>, StorageError>;

    async fn clear(&self, agent_id: &str) -> Result<u64, StorageError>;

    async fn clear_by_workflow(
        &self,
        agent_id: &str,
        workflow_id: &str,
    ) -> Result<u64, StorageError>;
}

/// Unique-key idempotency rows for webhook replay defense.
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    async fn is_processed(&self, webhook_id: &str) -> Result<bool, StorageError>;

    /// Insert the idempotency row; `Duplicate` signals a replay. The
    /// unique index is the concurrency primitive here.
    async fn mark_processed(&self, webhook_id: &str, provider: &str) -> Result<(), StorageError>;
}
