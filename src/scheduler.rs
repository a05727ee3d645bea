//! The scheduling loop: poll, claim, dispatch, collect, finalize.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info};

use crate::batch::partition;
use crate::collector::collect;
use crate::outcome::{OutcomePolicy, RandomPolicy, SleepWorkload, Workload};
use crate::runner::run_batch;
use crate::store::{StoreError, TaskStore};
use crate::task::{Task, TaskId, TaskState};

/// Configuration for the scheduling loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How long to sleep when a poll finds no due tasks.
    pub idle_interval: Duration,
    /// Number of tasks per batch.
    pub batch_size: usize,
    /// Upper bound on batches running at once; further batches of the same
    /// cycle wait for a permit.
    pub max_concurrent_batches: usize,
    /// When set, each cycle starts by re-queueing hidden tasks whose claim is
    /// older than this, recovering tasks stranded by a crashed run.
    pub stale_hidden_after: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(60),
            batch_size: 4,
            max_concurrent_batches: 8,
            stale_hidden_after: None,
        }
    }
}

/// Polls a task store for due tasks and drives them through the
/// hide → dispatch → collect → finalize cycle.
pub struct Scheduler<S: TaskStore> {
    store: Arc<S>,
    workload: Arc<dyn Workload>,
    policy: Arc<dyn OutcomePolicy>,
    config: SchedulerConfig,
}

/// Builder for constructing a [`Scheduler`].
pub struct SchedulerBuilder<S: TaskStore> {
    store: S,
    workload: Arc<dyn Workload>,
    policy: Arc<dyn OutcomePolicy>,
    config: SchedulerConfig,
}

impl<S: TaskStore + 'static> SchedulerBuilder<S> {
    /// Create a builder around the given store, with the stand-in
    /// three-second sleep workload and a coin-flip outcome policy.
    pub fn new(store: S) -> Self {
        Self {
            store,
            workload: Arc::new(SleepWorkload(Duration::from_secs(3))),
            policy: Arc::new(RandomPolicy::new()),
            config: SchedulerConfig::default(),
        }
    }

    /// Set the sleep interval used when a poll finds nothing due.
    pub fn idle_interval(mut self, interval: Duration) -> Self {
        self.config.idle_interval = interval;
        self
    }

    /// Set the batch size. Must be at least 1.
    pub fn batch_size(mut self, size: usize) -> Self {
        assert!(size >= 1, "batch_size must be at least 1");
        self.config.batch_size = size;
        self
    }

    /// Bound the number of concurrently running batches. Must be at least 1.
    pub fn max_concurrent_batches(mut self, n: usize) -> Self {
        assert!(n >= 1, "max_concurrent_batches must be at least 1");
        self.config.max_concurrent_batches = n;
        self
    }

    /// Replace the per-task workload.
    pub fn workload(mut self, workload: impl Workload + 'static) -> Self {
        self.workload = Arc::new(workload);
        self
    }

    /// Replace the outcome policy.
    pub fn outcome_policy(mut self, policy: impl OutcomePolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Enable the recovery sweep: at the start of each cycle, hidden tasks
    /// claimed more than `age` ago are moved back to the queue.
    pub fn requeue_hidden_older_than(mut self, age: Duration) -> Self {
        self.config.stale_hidden_after = Some(age);
        self
    }

    /// Build the scheduler.
    pub fn build(self) -> Scheduler<S> {
        Scheduler {
            store: Arc::new(self.store),
            workload: self.workload,
            policy: self.policy,
            config: self.config,
        }
    }
}

impl<S: TaskStore + 'static> Scheduler<S> {
    /// The injected store, for enqueueing tasks alongside a running scheduler.
    pub fn store(&self) -> Arc<S> {
        self.store.clone()
    }

    /// Add a task due at `exec_time`, logging the addition.
    pub async fn enqueue(
        &self,
        exec_time: DateTime<Utc>,
        task_type: &str,
    ) -> Result<TaskId, StoreError> {
        let id = self.store.insert(exec_time, task_type).await?;
        info!(task_id = id.0, task_type = %task_type, "task added");
        Ok(id)
    }

    /// Run the scheduling loop until a store operation fails.
    ///
    /// Only one cycle is ever in flight: the next poll does not start until
    /// the previous cycle has collected all of its outcomes and written them
    /// back.
    pub async fn run(&self) -> Result<(), StoreError> {
        info!(
            batch_size = self.config.batch_size,
            max_concurrent_batches = self.config.max_concurrent_batches,
            idle_secs = self.config.idle_interval.as_secs(),
            "scheduler started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_batches));
        loop {
            if let Err(e) = self.run_cycle(&semaphore).await {
                error!(error = %e, "store error, stopping scheduler");
                return Err(e);
            }
        }
    }

    async fn run_cycle(&self, semaphore: &Arc<Semaphore>) -> Result<(), StoreError> {
        let now = Utc::now();

        if let Some(age) = self.config.stale_hidden_after {
            let requeued = self.store.requeue_stale_hidden(now, age).await?;
            if requeued > 0 {
                info!(requeued, "re-queued stale hidden tasks");
            }
        }

        let tasks = self.store.claim_due(now).await?;
        if tasks.is_empty() {
            debug!(
                idle_secs = self.config.idle_interval.as_secs(),
                "nothing due, sleeping"
            );
            tokio::time::sleep(self.config.idle_interval).await;
            return Ok(());
        }

        let total = tasks.len();
        info!(count = total, "claimed due tasks");

        let batches = partition(tasks, self.config.batch_size);
        let (tx, rx) = mpsc::unbounded_channel();
        for batch in batches {
            let permit = semaphore.clone().acquire_owned().await.unwrap();
            let workload = self.workload.clone();
            let policy = self.policy.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                run_batch(batch, workload, policy, tx).await;
                drop(permit);
            });
        }
        drop(tx);

        let outcomes = collect(rx, total).await;
        if outcomes.total() != total {
            // A batch runner died mid-batch; finalize what did arrive and
            // leave the rest hidden for the recovery sweep.
            error!(
                collected = outcomes.total(),
                dispatched = total,
                "cycle ended with missing outcomes"
            );
        }
        info!(
            success = outcomes.success.len(),
            failure = outcomes.failure.len(),
            "cycle outcomes collected"
        );

        self.store
            .bulk_set_state(&ids(&outcomes.success), TaskState::Success)
            .await?;
        self.store
            .bulk_set_state(&ids(&outcomes.failure), TaskState::Failure)
            .await?;

        Ok(())
    }
}

fn ids(tasks: &[Task]) -> Vec<TaskId> {
    tasks.iter().map(|t| t.id).collect()
}
