// Checkpointing - Persist and resume pipeline tasks
use super::state::TaskState;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{error, info};

/// Checkpoint - Snapshot of a task after a stage transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub task_id: String,
    pub state: TaskState,
    pub version: i32,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a snapshot; returns the checkpoint id.
    async fn save(&self, task_id: &str, state: &TaskState) -> Result<String>;

    /// Latest checkpoint for the task.
    async fn load(&self, task_id: &str) -> Result<Option<Checkpoint>>;

    /// Every checkpoint for the task, oldest first.
    async fn list(&self, task_id: &str) -> Result<Vec<Checkpoint>>;
}

fn checkpoint_id(task_id: &str, version: i32) -> String {
    format!("{}::{}", task_id, version)
}

/// Process-local checkpoints.
#[derive(Default)]
pub struct MemoryCheckpointer {
    checkpoints: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointer {
    async fn save(&self, task_id: &str, state: &TaskState) -> Result<String> {
        let mut checkpoints = self.checkpoints.write().await;
        let history = checkpoints.entry(task_id.to_string()).or_default();
        let version = history.last().map(|c| c.version).unwrap_or(0) + 1;
        let id = checkpoint_id(task_id, version);

        history.push(Checkpoint {
            checkpoint_id: id.clone(),
            task_id: task_id.to_string(),
            state: state.clone(),
            version,
            created_at: Utc::now(),
        });
        tracing::debug!("💾 Checkpoint saved: {} (step: {})", id, state.step());
        Ok(id)
    }

    async fn load(&self, task_id: &str) -> Result<Option<Checkpoint>> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints.get(task_id).and_then(|h| h.last().cloned()))
    }

    async fn list(&self, task_id: &str) -> Result<Vec<Checkpoint>> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints.get(task_id).cloned().unwrap_or_default())
    }
}

/// Postgres-backed checkpoints, one JSONB row per snapshot.
pub struct PgCheckpointer {
    pool: PgPool,
}

impl PgCheckpointer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a small pool and make sure the table exists.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(db_error("connect to database"))?;
        let checkpointer = Self::new(pool);
        checkpointer.setup().await?;
        Ok(checkpointer)
    }

    /// Setup checkpoint table
    pub async fn setup(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_checkpoints (
                checkpoint_id VARCHAR(255) PRIMARY KEY,
                task_id VARCHAR(255) NOT NULL,
                step VARCHAR(32) NOT NULL,
                state JSONB NOT NULL,
                version INTEGER NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error("create checkpoint table"))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_pipeline_checkpoints_task_id
            ON pipeline_checkpoints(task_id, version)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error("create task index"))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_pipeline_checkpoints_created_at
            ON pipeline_checkpoints(created_at)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error("create created_at index"))?;

        info!("✅ Pipeline checkpoint table setup complete");
        Ok(())
    }

    /// Delete old checkpoints (cleanup)
    pub async fn cleanup_old_checkpoints(&self, older_than_days: i64) -> Result<u64> {
        let cutoff_date = Utc::now() - chrono::Duration::days(older_than_days);

        let result = sqlx::query("DELETE FROM pipeline_checkpoints WHERE created_at < $1")
            .bind(cutoff_date)
            .execute(&self.pool)
            .await
            .map_err(db_error("cleanup checkpoints"))?;

        info!("🧹 Cleaned up {} old checkpoints", result.rows_affected());
        Ok(result.rows_affected())
    }
}

fn db_error(action: &'static str) -> impl Fn(sqlx::Error) -> PipelineError {
    move |e| {
        error!("Failed to {}: {}", action, e);
        PipelineError::Checkpoint(format!("Failed to {}: {}", action, e))
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointer {
    async fn save(&self, task_id: &str, state: &TaskState) -> Result<String> {
        let current_version: Option<i32> =
            sqlx::query_scalar("SELECT MAX(version) FROM pipeline_checkpoints WHERE task_id = $1")
                .bind(task_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error("get version"))?;

        let version: i32 = current_version.unwrap_or(0) + 1;
        let id = checkpoint_id(task_id, version);
        let state_json = serde_json::to_value(state)?;

        sqlx::query(
            r#"
            INSERT INTO pipeline_checkpoints
            (checkpoint_id, task_id, step, state, version, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&id)
        .bind(task_id)
        .bind(state.step().as_str())
        .bind(state_json)
        .bind(version)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_error("save checkpoint"))?;

        info!("💾 Checkpoint saved: {} (version: {})", id, version);
        Ok(id)
    }

    async fn load(&self, task_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            r#"
            SELECT checkpoint_id, task_id, state, version, created_at
            FROM pipeline_checkpoints
            WHERE task_id = $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("load checkpoint"))?;

        row.map(CheckpointRow::into_checkpoint).transpose()
    }

    async fn list(&self, task_id: &str) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query_as::<_, CheckpointRow>(
            r#"
            SELECT checkpoint_id, task_id, state, version, created_at
            FROM pipeline_checkpoints
            WHERE task_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("list checkpoints"))?;

        rows.into_iter().map(CheckpointRow::into_checkpoint).collect()
    }
}

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    checkpoint_id: String,
    task_id: String,
    state: serde_json::Value,
    version: i32,
    created_at: DateTime<Utc>,
}

impl CheckpointRow {
    fn into_checkpoint(self) -> Result<Checkpoint> {
        Ok(Checkpoint {
            state: serde_json::from_value(self.state)?,
            checkpoint_id: self.checkpoint_id,
            task_id: self.task_id,
            version: self.version,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::state::{StateUpdate, Step, TaskConfig};

    #[tokio::test]
    async fn test_memory_versions_and_latest() {
        let store = MemoryCheckpointer::new();
        let mut state = TaskState::new("task-1".to_string(), TaskConfig::new("topic"));

        let first = store.save("task-1", &state).await.unwrap();
        state.apply_update(StateUpdate::new().with_step(Step::Writing));
        let second = store.save("task-1", &state).await.unwrap();

        assert_eq!(first, "task-1::1");
        assert_eq!(second, "task-1::2");

        let latest = store.load("task-1").await.unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.state.step(), Step::Writing);

        let history = store.list("task-1").await.unwrap();
        assert_eq!(history.iter().map(|c| c.version).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(history[0].state.step(), Step::Init);
    }

    #[tokio::test]
    async fn test_memory_unknown_task() {
        let store = MemoryCheckpointer::new();
        assert!(store.load("nope").await.unwrap().is_none());
        assert!(store.list("nope").await.unwrap().is_empty());
    }
}
