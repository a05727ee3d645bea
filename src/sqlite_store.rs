//! SQLite implementation of TaskStore.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use std::time::Duration;

use crate::store::{StoreError, TaskStore};
use crate::task::{Task, TaskId, TaskState};

/// SQLite-backed task store.
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

/// Timestamps are stored as fixed-width RFC 3339 text so that string
/// comparison in SQL matches chronological order.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidTimestamp(s.to_string()))
}

fn row_to_task(id: i64, exec_time: &str, task_type: String, state: &str) -> Result<Task, StoreError> {
    Ok(Task {
        id: TaskId(id),
        exec_time: parse_ts(exec_time)?,
        task_type,
        state: TaskState::parse(state).ok_or_else(|| StoreError::InvalidState(state.to_string()))?,
    })
}

impl SqliteTaskStore {
    /// Create a new SqliteTaskStore.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run migrations to create the tasks table.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY,
                exec_time TEXT NOT NULL,
                task_type TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'queue',
                hidden_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_tasks_state_exec_time
            ON tasks(state, exec_time)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert(
        &self,
        exec_time: DateTime<Utc>,
        task_type: &str,
    ) -> Result<TaskId, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO tasks (exec_time, task_type, state)
            VALUES (?, ?, 'queue')
            RETURNING id
            "#,
        )
        .bind(fmt_ts(exec_time))
        .bind(task_type)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(TaskId(id))
    }

    async fn fetch_due(&self, now: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query_as::<_, (i64, String, String, String)>(
            r#"
            SELECT id, exec_time, task_type, state FROM tasks
            WHERE state = 'queue' AND exec_time < ?
            "#,
        )
        .bind(fmt_ts(now))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        rows.into_iter()
            .map(|(id, exec_time, task_type, state)| row_to_task(id, &exec_time, task_type, &state))
            .collect()
    }

    async fn bulk_set_state(&self, ids: &[TaskId], state: TaskState) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }

        let placeholders: Vec<&str> = ids.iter().map(|_| "?").collect();
        let update_query = format!(
            "UPDATE tasks SET state = ?, hidden_at = ? WHERE id IN ({})",
            placeholders.join(",")
        );

        let hidden_at = match state {
            TaskState::Hidden => Some(fmt_ts(Utc::now())),
            _ => None,
        };

        let mut query = sqlx::query(&update_query).bind(state.as_str()).bind(hidden_at);
        for id in ids {
            query = query.bind(id.0);
        }
        query
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn claim_due(&self, now: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        // Select and hide inside one transaction so no other poll can see
        // the same rows between the two steps.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        let rows = sqlx::query_as::<_, (i64, String, String)>(
            r#"
            SELECT id, exec_time, task_type FROM tasks
            WHERE state = 'queue' AND exec_time < ?
            "#,
        )
        .bind(fmt_ts(now))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        if rows.is_empty() {
            tx.commit()
                .await
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            return Ok(vec![]);
        }

        let placeholders: Vec<&str> = rows.iter().map(|_| "?").collect();
        let update_query = format!(
            "UPDATE tasks SET state = 'hidden', hidden_at = ? WHERE id IN ({})",
            placeholders.join(",")
        );
        let mut query = sqlx::query(&update_query).bind(fmt_ts(now));
        for (id, _, _) in &rows {
            query = query.bind(id);
        }
        query
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        rows.into_iter()
            .map(|(id, exec_time, task_type)| {
                Ok(Task {
                    id: TaskId(id),
                    exec_time: parse_ts(&exec_time)?,
                    task_type,
                    state: TaskState::Hidden,
                })
            })
            .collect()
    }

    async fn requeue_stale_hidden(
        &self,
        now: DateTime<Utc>,
        older_than: Duration,
    ) -> Result<usize, StoreError> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        let cutoff = fmt_ts(now - age);

        let result = sqlx::query(
            r#"
            UPDATE tasks SET state = 'queue', hidden_at = NULL
            WHERE state = 'hidden' AND hidden_at IS NOT NULL AND hidden_at < ?
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(result.rows_affected() as usize)
    }

    async fn count_in_state(&self, state: TaskState) -> Result<i64, StoreError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tasks WHERE state = ?")
            .bind(state.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))
    }
}
