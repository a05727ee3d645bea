//! Fan-in of outcomes from a cycle's concurrently running batches.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::outcome::{Outcome, TaskOutcome};
use crate::task::Task;

/// Outcomes of one scheduling cycle, partitioned by result.
#[derive(Debug, Default)]
pub struct CycleOutcome {
    pub success: Vec<Task>,
    pub failure: Vec<Task>,
}

impl CycleOutcome {
    pub fn total(&self) -> usize {
        self.success.len() + self.failure.len()
    }
}

/// Receive exactly `expected` outcomes from the shared channel, in whatever
/// order they arrive, and partition them into success and failure sets.
///
/// Returns early only if every sender is dropped first, which means a batch
/// runner died without emitting all of its outcomes; the caller decides what
/// to do with the shortfall.
pub async fn collect(
    mut rx: mpsc::UnboundedReceiver<TaskOutcome>,
    expected: usize,
) -> CycleOutcome {
    let mut cycle = CycleOutcome::default();
    while cycle.total() < expected {
        match rx.recv().await {
            Some(TaskOutcome { task, outcome }) => {
                debug!(task_id = task.id.0, outcome = ?outcome, "outcome received");
                match outcome {
                    Outcome::Success => cycle.success.push(task),
                    Outcome::Failure => cycle.failure.push(task),
                }
            }
            None => {
                warn!(
                    received = cycle.total(),
                    expected, "outcome channel closed before all outcomes arrived"
                );
                break;
            }
        }
    }
    cycle
}
