//! Batch runner: executes one batch of tasks sequentially.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::outcome::{OutcomePolicy, TaskOutcome, Workload};
use crate::task::Task;

/// Run one batch to completion, emitting each task's outcome onto the shared
/// channel as soon as it is known.
///
/// Tasks within a batch never overlap; parallelism comes from the scheduler
/// running many batches at once. There is no per-task timeout: a stalled
/// workload stalls the rest of its batch.
pub async fn run_batch(
    batch: Vec<Task>,
    workload: Arc<dyn Workload>,
    policy: Arc<dyn OutcomePolicy>,
    tx: mpsc::UnboundedSender<TaskOutcome>,
) {
    for task in batch {
        workload.run(&task).await;
        let outcome = policy.decide(&task);
        debug!(
            task_id = task.id.0,
            task_type = %task.task_type,
            outcome = ?outcome,
            "task executed"
        );
        // The receiver is held by the collector until all of the cycle's
        // outcomes have arrived, so a send can only fail after the cycle
        // has already been abandoned.
        let _ = tx.send(TaskOutcome { task, outcome });
    }
}
