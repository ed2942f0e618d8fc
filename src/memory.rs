//! Persistent agent memory
//!
//! Namespaced key-value storage that survives across workflow runs.
//! Keys are scoped to prevent collisions: agent-wide, per-workflow, or
//! per-node, with the namespace key `agent:workflow:node:key` (missing
//! tiers become `*`). Values are JSON.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::storage::MemoryRepository;

/// Memory visibility scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryScope {
    /// Shared across every workflow of the agent
    Agent,
    /// Shared across nodes of one workflow
    Workflow,
    /// Isolated to a single node
    Node,
}

/// Scoped memory handle for one agent.
#[derive(Clone)]
pub struct AgentMemory {
    agent_id: String,
    workflow_id: Option<String>,
    node_id: Option<String>,
    scope: MemoryScope,
    repo: Arc<dyn MemoryRepository>,
}

impl AgentMemory {
    /// Create a memory handle.
    ///
    /// Workflow scope requires `workflow_id`; node scope requires both
    /// `workflow_id` and `node_id`.
    pub fn new(
        agent_id: impl Into<String>,
        workflow_id: Option<String>,
        node_id: Option<String>,
        scope: MemoryScope,
        repo: Arc<dyn MemoryRepository>,
    ) -> Result<Self, StorageError> {
        if scope == MemoryScope::Workflow && workflow_id.is_none() {
            return Err(StorageError::Backend(
                "workflow_id is required for workflow scope".into(),
            ));
        }
        if scope == MemoryScope::Node && (workflow_id.is_none() || node_id.is_none()) {
            return Err(StorageError::Backend(
                "workflow_id and node_id are required for node scope".into(),
            ));
        }
        Ok(Self {
            agent_id: agent_id.into(),
            workflow_id,
            node_id,
            scope,
            repo,
        })
    }

    /// Agent-wide memory.
    pub fn for_agent(
        agent_id: impl Into<String>,
        repo: Arc<dyn MemoryRepository>,
    ) -> Self {
        Self::new(agent_id, None, None, MemoryScope::Agent, repo)
            .expect("agent scope has no requirements")
    }

    /// Namespace key: `agent:workflow:node:key` with `*` placeholders.
    fn namespace(&self, key: &str) -> String {
        format!(
            "{}:{}:{}:{}",
            self.agent_id,
            self.workflow_id.as_deref().unwrap_or("*"),
            self.node_id.as_deref().unwrap_or("*"),
            key
        )
    }

    /// Store a value. `ttl` is accepted for interface compatibility but
    /// not yet enforced.
    pub async fn write(
        &self,
        key: &str,
        value: &Value,
        ttl: Option<u64>,
    ) -> Result<(), StorageError> {
        if ttl.is_some() {
            debug!(key, "Memory TTL requested; not enforced by this backend");
        }
        let serialized = value.to_string();
        self.repo
            .set(
                &self.namespace(key),
                &serialized,
                &self.agent_id,
                self.workflow_id.as_deref(),
                self.node_id.as_deref(),
                key,
            )
            .await?;
        debug!(key, scope = ?self.scope, "Memory written");
        Ok(())
    }

    /// Read a value, or `default` when absent.
    pub async fn read(&self, key: &str, default: Value) -> Result<Value, StorageError> {
        match self.repo.get(&self.namespace(key)).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(value) => Ok(value),
                Err(e) => {
                    warn!(key, error = %e, "Failed to deserialize memory value");
                    Ok(default)
                }
            },
            None => Ok(default),
        }
    }

    /// Read a value, `None` when absent.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let value = self.read(key, Value::Null).await?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    /// Delete a key; returns whether it existed.
    pub async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.repo.delete(&self.namespace(key)).await
    }

    /// Whether a key exists in this scope.
    pub async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.repo.get(&self.namespace(key)).await?.is_some())
    }

    /// `(key, value)` pairs of this scope, filtered by key prefix.
    pub async fn list(&self, prefix: &str) -> Result<Vec<(String, Value)>, StorageError> {
        // The repository returns every row of the agent; the same user
        // key can exist in several scopes, so collect distinct keys and
        // resolve each through this scope's namespace.
        let keys: std::collections::BTreeSet<String> = self
            .repo
            .list(&self.agent_id, prefix)
            .await?
            .into_iter()
            .map(|(key, _)| key)
            .collect();

        let mut result = Vec::new();
        for key in keys {
            let Some(raw) = self.repo.get(&self.namespace(&key)).await? else {
                continue;
            };
            match serde_json::from_str(&raw) {
                Ok(value) => result.push((key, value)),
                Err(e) => {
                    warn!(key, error = %e, "Skipping undeserializable memory value");
                }
            }
        }
        Ok(result)
    }

    /// Keys of this scope.
    pub async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.list("").await?.into_iter().map(|(k, _)| k).collect())
    }

    /// Clear memory at this scope: workflow scope deletes only the
    /// current `(agent, workflow)` rows; everything else clears the
    /// whole agent.
    pub async fn clear(&self) -> Result<u64, StorageError> {
        let count = match (&self.scope, &self.workflow_id) {
            (MemoryScope::Workflow, Some(workflow_id)) => {
                self.repo
                    .clear_by_workflow(&self.agent_id, workflow_id)
                    .await?
            }
            _ => self.repo.clear(&self.agent_id).await?,
        };
        debug!(agent = %self.agent_id, count, "Memory cleared");
        Ok(count)
    }
}
