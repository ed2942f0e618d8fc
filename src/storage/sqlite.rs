//! SQLite storage backend
//!
//! One `tokio_rusqlite::Connection` serves every repository trait. The
//! connection executes calls on a single background thread, which makes
//! per-row operations (the register upsert, the heartbeat update, the
//! idempotency insert) naturally atomic and linearizable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde_json::Value;
use tokio_rusqlite::Connection;
use tracing::debug;

use super::records::{
    DeploymentRecord, ExecutionCompletion, ExecutionRecord, ExecutionStateRecord, ExecutionStatus,
    WebhookEventRecord,
};
use super::{
    DeploymentRepository, ExecutionRepository, ExecutionStateRepository, MemoryRepository,
    WebhookEventRepository,
};
use crate::error::StorageError;
use crate::orchestrator::filters::matches_filters;

/// SQLite-backed store implementing every repository trait.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub async fn open(path: impl AsRef<str>) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref())
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to open SQLite: {}", e)))?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory database, for tests and ephemeral runs.
    pub async fn in_memory() -> Result<Self, StorageError> {
        Self::open(":memory:").await
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    r#"
                    CREATE TABLE IF NOT EXISTS executions (
                        id TEXT PRIMARY KEY,
                        workflow_name TEXT NOT NULL,
                        status TEXT NOT NULL,
                        config_snapshot TEXT,
                        inputs TEXT,
                        outputs TEXT,
                        error_message TEXT,
                        started_at TEXT NOT NULL,
                        completed_at TEXT,
                        duration_seconds REAL,
                        total_tokens INTEGER,
                        total_cost REAL,
                        bottleneck_info TEXT
                    );
                    CREATE INDEX IF NOT EXISTS idx_executions_workflow
                        ON executions(workflow_name, started_at);

                    CREATE TABLE IF NOT EXISTS execution_states (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        execution_id TEXT NOT NULL,
                        node_id TEXT NOT NULL,
                        state_data TEXT NOT NULL,
                        created_at TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_execution_states_run
                        ON execution_states(execution_id, id);

                    CREATE TABLE IF NOT EXISTS deployments (
                        deployment_id TEXT PRIMARY KEY,
                        deployment_name TEXT NOT NULL,
                        host TEXT NOT NULL,
                        port INTEGER NOT NULL,
                        workflow_name TEXT,
                        metadata TEXT,
                        ttl_seconds INTEGER NOT NULL,
                        last_heartbeat TEXT NOT NULL,
                        registered_at TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_deployments_heartbeat
                        ON deployments(last_heartbeat);

                    CREATE TABLE IF NOT EXISTS memory_records (
                        namespace_key TEXT PRIMARY KEY,
                        agent_id TEXT NOT NULL,
                        workflow_id TEXT,
                        node_id TEXT,
                        key TEXT NOT NULL,
                        value TEXT NOT NULL,
                        created_at TEXT NOT NULL,
                        updated_at TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_memory_agent
                        ON memory_records(agent_id, key);

                    CREATE TABLE IF NOT EXISTS webhook_events (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        webhook_id TEXT NOT NULL UNIQUE,
                        provider TEXT NOT NULL,
                        processed_at TEXT NOT NULL
                    );
                    "#,
                )?;
                Ok(())
            })
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to create schema: {}", e)))?;
        debug!("SQLite schema ready");
        Ok(())
    }
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn parse_json(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<Value>> {
    raw.map(|s| {
        serde_json::from_str(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
    })
    .transpose()
}

fn row_to_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let status_raw: String = row.get(2)?;
    let status = ExecutionStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown status '{}'", status_raw).into(),
        )
    })?;
    let started_raw: String = row.get(7)?;
    let completed_raw: Option<String> = row.get(8)?;

    Ok(ExecutionRecord {
        id: row.get(0)?,
        workflow_name: row.get(1)?,
        status,
        config_snapshot: parse_json(3, row.get(3)?)?,
        inputs: parse_json(4, row.get(4)?)?,
        outputs: parse_json(5, row.get(5)?)?,
        error_message: row.get(6)?,
        started_at: parse_ts(7, &started_raw)?,
        completed_at: completed_raw.map(|s| parse_ts(8, &s)).transpose()?,
        duration_seconds: row.get(9)?,
        total_tokens: row.get(10)?,
        total_cost: row.get(11)?,
        bottleneck_info: parse_json(12, row.get(12)?)?,
    })
}

fn row_to_deployment(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeploymentRecord> {
    let heartbeat_raw: String = row.get(7)?;
    let registered_raw: String = row.get(8)?;
    Ok(DeploymentRecord {
        deployment_id: row.get(0)?,
        deployment_name: row.get(1)?,
        host: row.get(2)?,
        port: row.get::<_, i64>(3)? as u16,
        workflow_name: row.get(4)?,
        metadata: parse_json(5, row.get(5)?)?,
        ttl_seconds: row.get(6)?,
        last_heartbeat: parse_ts(7, &heartbeat_raw)?,
        registered_at: parse_ts(8, &registered_raw)?,
    })
}

const EXECUTION_COLUMNS: &str = "id, workflow_name, status, config_snapshot, inputs, outputs, \
     error_message, started_at, completed_at, duration_seconds, total_tokens, total_cost, \
     bottleneck_info";

const DEPLOYMENT_COLUMNS: &str = "deployment_id, deployment_name, host, port, workflow_name, \
     metadata, ttl_seconds, last_heartbeat, registered_at";

#[async_trait]
impl ExecutionRepository for SqliteStore {
    async fn add(&self, record: ExecutionRecord) -> Result<(), StorageError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO executions (id, workflow_name, status, config_snapshot, inputs, \
                     outputs, error_message, started_at, completed_at, duration_seconds, \
                     total_tokens, total_cost, bottleneck_info) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    params![
                        record.id,
                        record.workflow_name,
                        record.status.as_str(),
                        record.config_snapshot.map(|v| v.to_string()),
                        record.inputs.map(|v| v.to_string()),
                        record.outputs.map(|v| v.to_string()),
                        record.error_message,
                        ts(record.started_at),
                        record.completed_at.map(ts),
                        record.duration_seconds,
                        record.total_tokens,
                        record.total_cost,
                        record.bottleneck_info.map(|v| v.to_string()),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(StorageError::from)
    }

    async fn get(&self, id: &str) -> Result<Option<ExecutionRecord>, StorageError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM executions WHERE id = ?1",
                    EXECUTION_COLUMNS
                ))?;
                let mut rows = stmt.query_map(params![id], row_to_execution)?;
                Ok(rows.next().transpose()?)
            })
            .await
            .map_err(StorageError::from)
    }

    async fn list_by_workflow(
        &self,
        workflow_name: &str,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>, StorageError> {
        let workflow_name = workflow_name.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM executions WHERE workflow_name = ?1 \
                     ORDER BY started_at DESC LIMIT ?2",
                    EXECUTION_COLUMNS
                ))?;
                let rows = stmt.query_map(params![workflow_name, limit], row_to_execution)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
            .map_err(StorageError::from)
    }

    async fn list_all(&self, limit: u32) -> Result<Vec<ExecutionRecord>, StorageError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM executions ORDER BY started_at DESC LIMIT ?1",
                    EXECUTION_COLUMNS
                ))?;
                let rows = stmt.query_map(params![limit], row_to_execution)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
            .map_err(StorageError::from)
    }

    async fn update_status(&self, id: &str, status: ExecutionStatus) -> Result<(), StorageError> {
        let id = id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE executions SET status = ?1 WHERE id = ?2",
                    params![status.as_str(), id],
                )?)
            })
            .await
            .map_err(StorageError::from)?;
        if changed == 0 {
            return Err(StorageError::NotFound("execution not found".into()));
        }
        Ok(())
    }

    async fn update_completion(
        &self,
        id: &str,
        status: ExecutionStatus,
        completion: ExecutionCompletion,
    ) -> Result<(), StorageError> {
        let id = id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE executions SET status = ?1, completed_at = ?2, duration_seconds = ?3, \
                     total_tokens = ?4, total_cost = ?5, outputs = ?6, error_message = ?7, \
                     bottleneck_info = ?8 WHERE id = ?9",
                    params![
                        status.as_str(),
                        ts(Utc::now()),
                        completion.duration_seconds,
                        completion.total_tokens,
                        completion.total_cost,
                        completion.outputs.map(|v| v.to_string()),
                        completion.error_message,
                        completion.bottleneck_info.map(|v| v.to_string()),
                        id,
                    ],
                )?)
            })
            .await
            .map_err(StorageError::from)?;
        if changed == 0 {
            return Err(StorageError::NotFound("execution not found".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionStateRepository for SqliteStore {
    async fn save(
        &self,
        execution_id: &str,
        node_id: &str,
        state_data: Value,
    ) -> Result<(), StorageError> {
        let execution_id = execution_id.to_string();
        let node_id = node_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO execution_states (execution_id, node_id, state_data, created_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![execution_id, node_id, state_data.to_string(), ts(Utc::now())],
                )?;
                Ok(())
            })
            .await
            .map_err(StorageError::from)
    }

    async fn get_latest(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionStateRecord>, StorageError> {
        let execution_id = execution_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT execution_id, node_id, state_data, created_at FROM execution_states \
                     WHERE execution_id = ?1 ORDER BY id DESC LIMIT 1",
                )?;
                let mut rows = stmt.query_map(params![execution_id], row_to_state)?;
                Ok(rows.next().transpose()?)
            })
            .await
            .map_err(StorageError::from)
    }

    async fn get_history(
        &self,
        execution_id: &str,
    ) -> Result<Vec<ExecutionStateRecord>, StorageError> {
        let execution_id = execution_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT execution_id, node_id, state_data, created_at FROM execution_states \
                     WHERE execution_id = ?1 ORDER BY id ASC",
                )?;
                let rows = stmt.query_map(params![execution_id], row_to_state)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
            .map_err(StorageError::from)
    }
}

fn row_to_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionStateRecord> {
    let created_raw: String = row.get(3)?;
    Ok(ExecutionStateRecord {
        execution_id: row.get(0)?,
        node_id: row.get(1)?,
        state_data: parse_json(2, row.get(2)?)?.unwrap_or(Value::Null),
        created_at: parse_ts(3, &created_raw)?,
    })
}

#[async_trait]
impl DeploymentRepository for SqliteStore {
    async fn upsert(&self, record: DeploymentRecord) -> Result<DeploymentRecord, StorageError> {
        let id = record.deployment_id.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO deployments (deployment_id, deployment_name, host, port, \
                     workflow_name, metadata, ttl_seconds, last_heartbeat, registered_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                     ON CONFLICT(deployment_id) DO UPDATE SET \
                       deployment_name = excluded.deployment_name, \
                       host = excluded.host, \
                       port = excluded.port, \
                       workflow_name = excluded.workflow_name, \
                       metadata = excluded.metadata, \
                       ttl_seconds = excluded.ttl_seconds, \
                       last_heartbeat = excluded.last_heartbeat",
                    params![
                        record.deployment_id,
                        record.deployment_name,
                        record.host,
                        record.port as i64,
                        record.workflow_name,
                        record.metadata.as_ref().map(|v| v.to_string()),
                        record.ttl_seconds,
                        ts(record.last_heartbeat),
                        ts(record.registered_at),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(StorageError::from)?;

        DeploymentRepository::get(self, &id)
            .await?
            .ok_or_else(|| StorageError::Backend("upsert lost its row".into()))
    }

    async fn get(&self, id: &str) -> Result<Option<DeploymentRecord>, StorageError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM deployments WHERE deployment_id = ?1",
                    DEPLOYMENT_COLUMNS
                ))?;
                let mut rows = stmt.query_map(params![id], row_to_deployment)?;
                Ok(rows.next().transpose()?)
            })
            .await
            .map_err(StorageError::from)
    }

    async fn list_all(&self, include_dead: bool) -> Result<Vec<DeploymentRecord>, StorageError> {
        let rows: Vec<DeploymentRecord> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM deployments ORDER BY deployment_id",
                    DEPLOYMENT_COLUMNS
                ))?;
                let rows = stmt.query_map([], row_to_deployment)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
            .map_err(StorageError::from)?;

        Ok(if include_dead {
            rows
        } else {
            rows.into_iter().filter(|d| d.is_alive()).collect()
        })
    }

    async fn update_heartbeat(&self, id: &str) -> Result<DateTime<Utc>, StorageError> {
        let id = id.to_string();
        let now = Utc::now();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE deployments SET last_heartbeat = ?1 WHERE deployment_id = ?2",
                    params![ts(now), id],
                )?)
            })
            .await
            .map_err(StorageError::from)?;
        if changed == 0 {
            return Err(StorageError::NotFound("deployment not found".into()));
        }
        Ok(now)
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let id = id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM deployments WHERE deployment_id = ?1",
                    params![id],
                )?)
            })
            .await
            .map_err(StorageError::from)?;
        if changed == 0 {
            return Err(StorageError::NotFound("deployment not found".into()));
        }
        Ok(())
    }

    async fn delete_expired(&self) -> Result<u64, StorageError> {
        let all = DeploymentRepository::list_all(self, true).await?;
        let expired: Vec<String> = all
            .into_iter()
            .filter(|d| !d.is_alive())
            .map(|d| d.deployment_id)
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        let count = expired.len() as u64;
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for id in &expired {
                    tx.execute("DELETE FROM deployments WHERE deployment_id = ?1", params![id])?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(StorageError::from)?;
        Ok(count)
    }

    async fn query_by_metadata(
        &self,
        filters: &serde_json::Map<String, Value>,
    ) -> Result<Vec<DeploymentRecord>, StorageError> {
        let live = DeploymentRepository::list_all(self, false).await?;
        Ok(live
            .into_iter()
            .filter(|d| {
                d.metadata
                    .as_ref()
                    .map(|m| matches_filters(m, filters))
                    .unwrap_or(false)
            })
            .collect())
    }

    async fn get_active(&self, cutoff_seconds: i64) -> Result<Vec<DeploymentRecord>, StorageError> {
        let cutoff = Utc::now() - chrono::Duration::seconds(cutoff_seconds);
        let all = DeploymentRepository::list_all(self, true).await?;
        Ok(all
            .into_iter()
            .filter(|d| d.last_heartbeat >= cutoff)
            .collect())
    }
}

#[async_trait]
impl MemoryRepository for SqliteStore {
    async fn set(
        &self,
        namespace_key: &str,
        value_json: &str,
        agent_id: &str,
        workflow_id: Option<&str>,
        node_id: Option<&str>,
        key: &str,
    ) -> Result<(), StorageError> {
        let namespace_key = namespace_key.to_string();
        let value_json = value_json.to_string();
        let agent_id = agent_id.to_string();
        let workflow_id = workflow_id.map(String::from);
        let node_id = node_id.map(String::from);
        let key = key.to_string();
        let now = ts(Utc::now());

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO memory_records (namespace_key, agent_id, workflow_id, node_id, \
                     key, value, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7) \
                     ON CONFLICT(namespace_key) DO UPDATE SET \
                       value = excluded.value, \
                       updated_at = excluded.updated_at",
                    params![namespace_key, agent_id, workflow_id, node_id, key, value_json, now],
                )?;
                Ok(())
            })
            .await
            .map_err(StorageError::from)
    }

    async fn get(&self, namespace_key: &str) -> Result<Option<String>, StorageError> {
        let namespace_key = namespace_key.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT value FROM memory_records WHERE namespace_key = ?1")?;
                let mut rows = stmt.query_map(params![namespace_key], |row| row.get(0))?;
                Ok(rows.next().transpose()?)
            })
            .await
            .map_err(StorageError::from)
    }

    async fn delete(&self, namespace_key: &str) -> Result<bool, StorageError> {
        let namespace_key = namespace_key.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM memory_records WHERE namespace_key = ?1",
                    params![namespace_key],
                )?)
            })
            .await
            .map_err(StorageError::from)?;
        Ok(changed > 0)
    }

    async fn list(
        &self,
        agent_id: &str,
        prefix: &str,
    ) -> Result<Vec<(String, String)>, StorageError> {
        let agent_id = agent_id.to_string();
        let prefix = prefix.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT key, value FROM memory_records WHERE agent_id = ?1 ORDER BY key",
                )?;
                let rows = stmt.query_map(params![agent_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                let all = rows.collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(all
                    .into_iter()
                    .filter(|(key, _)| key.starts_with(&prefix))
                    .collect::<Vec<_>>())
            })
            .await
            .map_err(StorageError::from)
    }

    async fn clear(&self, agent_id: &str) -> Result<u64, StorageError> {
        let agent_id = agent_id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM memory_records WHERE agent_id = ?1",
                    params![agent_id],
                )?)
            })
            .await
            .map_err(StorageError::from)?;
        Ok(changed as u64)
    }

    async fn clear_by_workflow(
        &self,
        agent_id: &str,
        workflow_id: &str,
    ) -> Result<u64, StorageError> {
        let agent_id = agent_id.to_string();
        let workflow_id = workflow_id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM memory_records WHERE agent_id = ?1 AND workflow_id = ?2",
                    params![agent_id, workflow_id],
                )?)
            })
            .await
            .map_err(StorageError::from)?;
        Ok(changed as u64)
    }
}

#[async_trait]
impl WebhookEventRepository for SqliteStore {
    async fn is_processed(&self, webhook_id: &str) -> Result<bool, StorageError> {
        let webhook_id = webhook_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT 1 FROM webhook_events WHERE webhook_id = ?1")?;
                let mut rows = stmt.query_map(params![webhook_id], |_| Ok(()))?;
                Ok(rows.next().transpose()?.is_some())
            })
            .await
            .map_err(StorageError::from)
    }

    async fn mark_processed(&self, webhook_id: &str, provider: &str) -> Result<(), StorageError> {
        let webhook_id_owned = webhook_id.to_string();
        let provider = provider.to_string();
        let result = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO webhook_events (webhook_id, provider, processed_at) \
                     VALUES (?1, ?2, ?3)",
                    params![webhook_id_owned, provider, ts(Utc::now())],
                )?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(failure, _)))
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::Duplicate(webhook_id.to_string()))
            }
            Err(e) => Err(StorageError::from(e)),
        }
    }
}

impl SqliteStore {
    /// Fetch a stored webhook event, for diagnostics.
    pub async fn get_webhook_event(
        &self,
        webhook_id: &str,
    ) -> Result<Option<WebhookEventRecord>, StorageError> {
        let webhook_id = webhook_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT webhook_id, provider, processed_at FROM webhook_events \
                     WHERE webhook_id = ?1",
                )?;
                let mut rows = stmt.query_map(params![webhook_id], |row| {
                    let processed_raw: String = row.get(2)?;
                    Ok(WebhookEventRecord {
                        webhook_id: row.get(0)?,
                        provider: row.get(1)?,
                        processed_at: parse_ts(2, &processed_raw)?,
                    })
                })?;
                Ok(rows.next().transpose()?)
            })
            .await
            .map_err(StorageError::from)
    }
}
