//! Task data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a task, assigned by the store on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub i64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a task.
///
/// A task moves `Queued → Hidden` when a cycle claims it, then
/// `Hidden → Success | Failure` once its workload has run. `Success` and
/// `Failure` are terminal; nothing in the scheduler moves a task back to
/// `Queued` except the stale-claim recovery sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Waiting for its `exec_time` to arrive.
    #[serde(rename = "queue")]
    Queued,
    /// Claimed by a running cycle, invisible to further polls.
    #[serde(rename = "hidden")]
    Hidden,
    /// Workload ran and reported success.
    #[serde(rename = "success")]
    Success,
    /// Workload ran and reported failure.
    #[serde(rename = "failure")]
    Failure,
}

impl TaskState {
    /// The string persisted in the store for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queue",
            TaskState::Hidden => "hidden",
            TaskState::Success => "success",
            TaskState::Failure => "failure",
        }
    }

    /// Parse a persisted state string. Returns `None` for unknown strings.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queue" => Some(TaskState::Queued),
            "hidden" => Some(TaskState::Hidden),
            "success" => Some(TaskState::Success),
            "failure" => Some(TaskState::Failure),
            _ => None,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of schedulable work.
///
/// `id` is assigned by the store; `exec_time` and `task_type` are write-once.
/// Only the scheduler mutates `state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub exec_time: DateTime<Utc>,
    pub task_type: String,
    pub state: TaskState,
}
