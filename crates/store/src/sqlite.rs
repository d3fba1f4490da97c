use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};
use tracing::{error, info};
use uuid::Uuid;

use task_core::{DeviceInfo, DeviceInventory, FailReason, Task, TaskStatus};

use crate::error::{Result, StoreError};
use crate::traits::{DeviceStore, TaskStore};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        info!(database_url = %database_url, "initializing sqlite task store");

        let db_path = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url);

        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    error!(directory = %parent.display(), error = %e, "failed to create database directory");
                    StoreError::Migration(format!("failed to create database directory: {e}"))
                })?;
            }
        }

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::Migration(format!("invalid database url: {e}")))?
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(connect_options).await?;
        Self::create_tables(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                fail_reason TEXT,
                cmd_shell TEXT NOT NULL,
                output_files TEXT NOT NULL,
                hint_device_id TEXT NOT NULL,
                create_user TEXT NOT NULL,
                create_time TEXT NOT NULL,
                input_archive_ready INTEGER NOT NULL DEFAULT 0,
                device_id TEXT,
                start_time TEXT,
                finish_time TEXT,
                active_time TEXT NOT NULL,
                stdout TEXT,
                stderr TEXT
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)")
            .execute(pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS devices (
                key TEXT PRIMARY KEY,
                device_infos TEXT NOT NULL,
                update_time TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<Task> {
        let id: String = row.try_get("id")?;
        let status: String = row.try_get("status")?;
        let fail_reason: Option<String> = row.try_get("fail_reason")?;
        let cmd_shell: String = row.try_get("cmd_shell")?;
        let output_files: String = row.try_get("output_files")?;
        let create_time: String = row.try_get("create_time")?;
        let active_time: String = row.try_get("active_time")?;
        let start_time: Option<String> = row.try_get("start_time")?;
        let finish_time: Option<String> = row.try_get("finish_time")?;

        Ok(Task {
            id: Uuid::parse_str(&id).map_err(|e| StoreError::Migration(e.to_string()))?,
            status: status
                .parse()
                .map_err(|e: String| StoreError::Migration(e))?,
            fail_reason: fail_reason
                .map(|r| r.parse::<FailReason>())
                .transpose()
                .map_err(|e: String| StoreError::Migration(e))?,
            cmd_shell: serde_json::from_str(&cmd_shell)?,
            output_files: serde_json::from_str(&output_files)?,
            hint_device_id: row.try_get("hint_device_id")?,
            create_user: row.try_get("create_user")?,
            create_time: parse_time(&create_time)?,
            input_archive_ready: row.try_get::<i64, _>("input_archive_ready")? != 0,
            device_id: row.try_get("device_id")?,
            start_time: start_time.map(|t| parse_time(&t)).transpose()?,
            finish_time: finish_time.map(|t| parse_time(&t)).transpose()?,
            active_time: parse_time(&active_time)?,
            stdout: row.try_get("stdout")?,
            stderr: row.try_get("stderr")?,
        })
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Migration(format!("bad timestamp {raw}: {e}")))
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn insert(&self, task: &Task) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, status, fail_reason, cmd_shell, output_files, hint_device_id,
                create_user, create_time, input_archive_ready, device_id,
                start_time, finish_time, active_time, stdout, stderr
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(task.status.as_str())
        .bind(task.fail_reason.map(|r| r.as_str()))
        .bind(serde_json::to_string(&task.cmd_shell)?)
        .bind(serde_json::to_string(&task.output_files)?)
        .bind(&task.hint_device_id)
        .bind(&task.create_user)
        .bind(task.create_time.to_rfc3339())
        .bind(task.input_archive_ready as i64)
        .bind(&task.device_id)
        .bind(task.start_time.map(|t| t.to_rfc3339()))
        .bind(task.finish_time.map(|t| t.to_rfc3339()))
        .bind(task.active_time.to_rfc3339())
        .bind(&task.stdout)
        .bind(&task.stderr)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_one(&self, id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn find_queueing_ready(&self) -> Result<Option<Task>> {
        let row = sqlx::query(
            "SELECT * FROM tasks WHERE status = ? AND input_archive_ready = 1 \
             ORDER BY create_time ASC LIMIT 1",
        )
        .bind(TaskStatus::Queueing.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn find_by_statuses(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = statuses.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT * FROM tasks WHERE status IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn list_non_terminal(&self) -> Result<Vec<Task>> {
        self.find_by_statuses(&[
            TaskStatus::Queueing,
            TaskStatus::Preparing,
            TaskStatus::Running,
            TaskStatus::Killing,
        ])
        .await
    }

    async fn touch_active_time(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE tasks SET active_time = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_input_archive_ready(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE tasks SET input_archive_ready = 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cas_to_preparing(
        &self,
        id: Uuid,
        device_id: &str,
        start_time: DateTime<Utc>,
        active_time: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET status = ?, device_id = ?, start_time = ?, active_time = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(TaskStatus::Preparing.as_str())
        .bind(device_id)
        .bind(start_time.to_rfc3339())
        .bind(active_time.to_rfc3339())
        .bind(id.to_string())
        .bind(TaskStatus::Queueing.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cas_queueing_to_device_unavailable(
        &self,
        id: Uuid,
        finish_time: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET status = ?, fail_reason = ?, finish_time = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(TaskStatus::Failed.as_str())
        .bind(FailReason::DeviceUnavailable.as_str())
        .bind(finish_time.to_rfc3339())
        .bind(id.to_string())
        .bind(TaskStatus::Queueing.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cas_preparing_to_push_failed(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET status = ?, fail_reason = ? WHERE id = ? AND status = ?",
        )
        .bind(TaskStatus::Failed.as_str())
        .bind(FailReason::PushDataFailed.as_str())
        .bind(id.to_string())
        .bind(TaskStatus::Preparing.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cas_preparing_to_running(
        &self,
        id: Uuid,
        stdout: &str,
        stderr: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET status = ?, stdout = ?, stderr = ? WHERE id = ? AND status = ?",
        )
        .bind(TaskStatus::Running.as_str())
        .bind(stdout)
        .bind(stderr)
        .bind(id.to_string())
        .bind(TaskStatus::Preparing.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cas_running_to_completed(
        &self,
        id: Uuid,
        finish_time: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET status = ?, finish_time = ? WHERE id = ? AND status = ?",
        )
        .bind(TaskStatus::Completed.as_str())
        .bind(finish_time.to_rfc3339())
        .bind(id.to_string())
        .bind(TaskStatus::Running.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cas_running_to_nonzero_failed(
        &self,
        id: Uuid,
        finish_time: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET status = ?, fail_reason = ?, finish_time = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(TaskStatus::Failed.as_str())
        .bind(FailReason::NonzeroReturnCode.as_str())
        .bind(finish_time.to_rfc3339())
        .bind(id.to_string())
        .bind(TaskStatus::Running.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cas_running_to_pull_failed(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET status = ?, fail_reason = ? WHERE id = ? AND status = ?",
        )
        .bind(TaskStatus::Failed.as_str())
        .bind(FailReason::PullDataFailed.as_str())
        .bind(id.to_string())
        .bind(TaskStatus::Running.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cas_alive_to_killing(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET status = ? WHERE id = ? AND status IN (?, ?, ?)",
        )
        .bind(TaskStatus::Killing.as_str())
        .bind(id.to_string())
        .bind(TaskStatus::Queueing.as_str())
        .bind(TaskStatus::Preparing.as_str())
        .bind(TaskStatus::Running.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cas_killing_to_killed(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET status = ?, fail_reason = ? WHERE id = ? AND status = ?",
        )
        .bind(TaskStatus::Failed.as_str())
        .bind(FailReason::Killed.as_str())
        .bind(id.to_string())
        .bind(TaskStatus::Killing.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl DeviceStore for SqliteStore {
    async fn upsert_inventory(&self, inventory: &DeviceInventory) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO devices (key, device_infos, update_time) VALUES ('info', ?, ?)
            ON CONFLICT(key) DO UPDATE SET device_infos = excluded.device_infos, update_time = excluded.update_time
            "#,
        )
        .bind(serde_json::to_string(&inventory.device_infos)?)
        .bind(inventory.update_time.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_inventory(&self) -> Result<DeviceInventory> {
        let row = sqlx::query("SELECT device_infos, update_time FROM devices WHERE key = 'info'")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let device_infos: String = row.try_get("device_infos")?;
                let update_time: String = row.try_get("update_time")?;
                Ok(DeviceInventory {
                    device_infos: serde_json::from_str::<Vec<DeviceInfo>>(&device_infos)?,
                    update_time: parse_time(&update_time)?,
                })
            }
            None => Ok(DeviceInventory::empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use task_core::NewTask;

    async fn new_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn sample_task() -> Task {
        Task::new(NewTask {
            cmd_shell: vec!["echo".to_string(), "hi".to_string()],
            output_files: vec![],
            hint_device_id: "D1".to_string(),
            create_user: "alice".to_string(),
        })
    }

    #[tokio::test]
    async fn insert_then_find_one_round_trips_the_task() {
        let store = new_store().await;
        let task = sample_task();
        store.insert(&task).await.unwrap();

        let found = store.find_one(task.id).await.unwrap().unwrap();
        assert_eq!(found.id, task.id);
        assert_eq!(found.status, TaskStatus::Queueing);
        assert_eq!(found.hint_device_id, "D1");
    }

    #[tokio::test]
    async fn cas_to_preparing_fails_when_not_queueing() {
        let store = new_store().await;
        let task = sample_task();
        store.insert(&task).await.unwrap();

        let now = Utc::now();
        assert!(store.cas_to_preparing(task.id, "D1", now, now).await.unwrap());
        // Second attempt: task is now PREPARING, not QUEUEING, so it must
        // not apply again. Demonstrates the idempotent-CAS law.
        assert!(!store.cas_to_preparing(task.id, "D1", now, now).await.unwrap());
    }

    #[tokio::test]
    async fn pull_failure_dominates_even_after_command_success() {
        let store = new_store().await;
        let task = sample_task();
        store.insert(&task).await.unwrap();
        let now = Utc::now();
        store.cas_to_preparing(task.id, "D1", now, now).await.unwrap();
        store
            .cas_preparing_to_running(task.id, "/tmp/out.log", "/tmp/err.log")
            .await
            .unwrap();

        assert!(store.cas_running_to_pull_failed(task.id).await.unwrap());
        // Once FAILED(PULL_DATA_FAILED), the RUNNING -> COMPLETED CAS must
        // no longer apply.
        assert!(!store.cas_running_to_completed(task.id, now).await.unwrap());

        let found = store.find_one(task.id).await.unwrap().unwrap();
        assert_eq!(found.status, TaskStatus::Failed);
        assert_eq!(found.fail_reason, Some(FailReason::PullDataFailed));
    }

    #[tokio::test]
    async fn killing_dominates_and_resolves_to_failed_killed() {
        let store = new_store().await;
        let task = sample_task();
        store.insert(&task).await.unwrap();

        assert!(store.cas_alive_to_killing(task.id).await.unwrap());
        assert!(store.cas_killing_to_killed(task.id).await.unwrap());

        let found = store.find_one(task.id).await.unwrap().unwrap();
        assert_eq!(found.status, TaskStatus::Failed);
        assert_eq!(found.fail_reason, Some(FailReason::Killed));
    }

    #[tokio::test]
    async fn device_inventory_round_trips_through_upsert() {
        let store = new_store().await;
        let inventory = DeviceInventory {
            device_infos: vec![DeviceInfo {
                device_id: "D1".to_string(),
                power_on: Some(true),
                battery: Some(87.0),
                hostname: Some("pixel".to_string()),
            }],
            update_time: Utc::now(),
        };
        store.upsert_inventory(&inventory).await.unwrap();

        let fetched = store.get_inventory().await.unwrap();
        assert_eq!(fetched.device_infos.len(), 1);
        assert_eq!(fetched.device_infos[0].device_id, "D1");
    }
}
