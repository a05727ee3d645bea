//! Task storage trait and error types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use crate::task::{Task, TaskId, TaskState};

/// Error type for task store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid task state in store: {0}")]
    InvalidState(String),

    #[error("invalid timestamp in store: {0}")]
    InvalidTimestamp(String),
}

/// Trait for durable task storage backends.
///
/// The scheduler takes any `TaskStore` as an injected dependency; tests wrap
/// one to count calls, production code hands it a [`crate::SqliteTaskStore`].
/// `now` is always passed in rather than read from the ambient clock so
/// callers control due-ness in tests. The one exception is the claim
/// timestamp a backend records when [`bulk_set_state`](Self::bulk_set_state)
/// hides tasks: that is internal bookkeeping for the staleness sweep and is
/// stamped from the backend's own clock ([`claim_due`](Self::claim_due)
/// stamps it with the caller's `now`).
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create one task in state `queue`, returning its assigned id.
    async fn insert(
        &self,
        exec_time: DateTime<Utc>,
        task_type: &str,
    ) -> Result<TaskId, StoreError>;

    /// Return every task with `state = 'queue'` and `exec_time < now`.
    /// No ordering is guaranteed beyond "all eligible tasks returned".
    async fn fetch_due(&self, now: DateTime<Utc>) -> Result<Vec<Task>, StoreError>;

    /// Set the state of exactly the listed tasks. An empty id list is a
    /// successful no-op. Hiding tasks through this call records the claim
    /// time from the backend's clock; use [`claim_due`](Self::claim_due) to
    /// claim with a caller-supplied timestamp.
    async fn bulk_set_state(&self, ids: &[TaskId], state: TaskState) -> Result<(), StoreError>;

    /// Atomically fetch all due queued tasks and mark them hidden.
    ///
    /// The default implementation composes [`fetch_due`](Self::fetch_due) and
    /// [`bulk_set_state`](Self::bulk_set_state) for backends without
    /// transactions; transactional backends should override it so a crash
    /// between the two steps cannot strand or double-dispatch tasks.
    async fn claim_due(&self, now: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        let mut tasks = self.fetch_due(now).await?;
        let ids: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
        self.bulk_set_state(&ids, TaskState::Hidden).await?;
        for task in &mut tasks {
            task.state = TaskState::Hidden;
        }
        Ok(tasks)
    }

    /// Move hidden tasks claimed more than `older_than` ago back to `queue`,
    /// returning how many were re-queued. Recovers tasks stranded by a crash
    /// mid-cycle. Default is a no-op for backends that do not track claim
    /// times.
    async fn requeue_stale_hidden(
        &self,
        _now: DateTime<Utc>,
        _older_than: Duration,
    ) -> Result<usize, StoreError> {
        Ok(0)
    }

    /// Count tasks currently in the given state.
    async fn count_in_state(&self, state: TaskState) -> Result<i64, StoreError>;
}
