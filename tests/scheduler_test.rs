//! Integration tests for the scheduling loop.

#![cfg(feature = "sqlite")]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskmill::{
    FixedPolicy, NoopWorkload, Outcome, OutcomePolicy, SchedulerBuilder, SqliteTaskStore,
    StoreError, Task, TaskId, TaskState, TaskStore, Workload,
};

async fn setup_store() -> SqliteTaskStore {
    // One connection, so every query sees the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .unwrap();
    let store = SqliteTaskStore::new(pool);
    store.run_migrations().await.unwrap();
    store
}

/// Poll the store until `state` holds `expected` tasks or the deadline passes.
async fn wait_for_count<S: TaskStore>(store: &S, state: TaskState, expected: i64) {
    for _ in 0..100 {
        if store.count_in_state(state).await.unwrap() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "store never reached {} tasks in state {}",
        expected, state
    );
}

/// Store wrapper that counts claim and bulk-update calls.
struct CountingStore {
    inner: SqliteTaskStore,
    claims: Arc<AtomicUsize>,
    updates: Arc<AtomicUsize>,
}

#[async_trait]
impl TaskStore for CountingStore {
    async fn insert(
        &self,
        exec_time: DateTime<Utc>,
        task_type: &str,
    ) -> Result<TaskId, StoreError> {
        self.inner.insert(exec_time, task_type).await
    }

    async fn fetch_due(&self, now: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        self.inner.fetch_due(now).await
    }

    async fn bulk_set_state(&self, ids: &[TaskId], state: TaskState) -> Result<(), StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.bulk_set_state(ids, state).await
    }

    async fn claim_due(&self, now: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        self.inner.claim_due(now).await
    }

    async fn count_in_state(&self, state: TaskState) -> Result<i64, StoreError> {
        self.inner.count_in_state(state).await
    }
}

#[tokio::test]
async fn test_cycle_finalizes_all_successes() {
    let store = setup_store().await;
    let now = Utc::now();
    for i in 0..4 {
        store
            .insert(now - ChronoDuration::hours(i + 1), "sendemail")
            .await
            .unwrap();
    }

    let scheduler = SchedulerBuilder::new(store)
        .batch_size(4)
        .idle_interval(Duration::from_millis(10))
        .workload(NoopWorkload)
        .outcome_policy(FixedPolicy(Outcome::Success))
        .build();

    let store = scheduler.store();
    let handle = tokio::spawn(async move { scheduler.run().await });

    wait_for_count(store.as_ref(), TaskState::Success, 4).await;
    assert_eq!(store.count_in_state(TaskState::Hidden).await.unwrap(), 0);
    assert_eq!(store.count_in_state(TaskState::Queued).await.unwrap(), 0);
    assert_eq!(store.count_in_state(TaskState::Failure).await.unwrap(), 0);

    handle.abort();
}

#[tokio::test]
async fn test_enqueue_creates_queued_task() {
    let store = setup_store().await;
    let scheduler = SchedulerBuilder::new(store).workload(NoopWorkload).build();

    let now = Utc::now();
    let id = scheduler
        .enqueue(now - ChronoDuration::hours(1), "sendemail")
        .await
        .unwrap();

    let store = scheduler.store();
    let due = store.fetch_due(now).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, id);
    assert_eq!(due[0].task_type, "sendemail");
    assert_eq!(due[0].state, TaskState::Queued);
}

/// Outcome determined by task type: "alpha" succeeds, everything else fails.
struct TypedPolicy;

impl OutcomePolicy for TypedPolicy {
    fn decide(&self, task: &Task) -> Outcome {
        if task.task_type == "alpha" {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

#[tokio::test]
async fn test_nine_tasks_batch_four_all_accounted_for() {
    let store = setup_store().await;
    let now = Utc::now();
    for _ in 0..5 {
        store
            .insert(now - ChronoDuration::hours(1), "alpha")
            .await
            .unwrap();
    }
    for _ in 0..4 {
        store
            .insert(now - ChronoDuration::hours(1), "beta")
            .await
            .unwrap();
    }

    let scheduler = SchedulerBuilder::new(store)
        .batch_size(4)
        .idle_interval(Duration::from_millis(10))
        .workload(NoopWorkload)
        .outcome_policy(TypedPolicy)
        .build();

    let store = scheduler.store();
    let handle = tokio::spawn(async move { scheduler.run().await });

    wait_for_count(store.as_ref(), TaskState::Success, 5).await;
    wait_for_count(store.as_ref(), TaskState::Failure, 4).await;
    assert_eq!(store.count_in_state(TaskState::Hidden).await.unwrap(), 0);
    assert_eq!(store.count_in_state(TaskState::Queued).await.unwrap(), 0);

    handle.abort();
}

#[tokio::test]
async fn test_empty_store_idles_without_updates() {
    let claims = Arc::new(AtomicUsize::new(0));
    let updates = Arc::new(AtomicUsize::new(0));
    let store = CountingStore {
        inner: setup_store().await,
        claims: claims.clone(),
        updates: updates.clone(),
    };

    let scheduler = SchedulerBuilder::new(store)
        .idle_interval(Duration::from_millis(30))
        .workload(NoopWorkload)
        .build();

    let handle = tokio::spawn(async move { scheduler.run().await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.abort();

    // Polled repeatedly, never issued a state update.
    assert!(claims.load(Ordering::SeqCst) >= 2);
    assert_eq!(updates.load(Ordering::SeqCst), 0);
}

/// Workload that records how many batches run it at once.
struct TrackingWorkload {
    concurrent: Arc<AtomicUsize>,
    max_observed: Arc<AtomicUsize>,
    duration: Duration,
}

#[async_trait]
impl Workload for TrackingWorkload {
    async fn run(&self, _task: &Task) {
        let current = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_observed.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(self.duration).await;
        self.concurrent.fetch_sub(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_batch_fanout_is_bounded() {
    let store = setup_store().await;
    let now = Utc::now();
    for _ in 0..8 {
        store
            .insert(now - ChronoDuration::hours(1), "slow")
            .await
            .unwrap();
    }

    let max_observed = Arc::new(AtomicUsize::new(0));
    let workload = TrackingWorkload {
        concurrent: Arc::new(AtomicUsize::new(0)),
        max_observed: max_observed.clone(),
        duration: Duration::from_millis(30),
    };

    // One task per batch, at most two batches live at a time.
    let scheduler = SchedulerBuilder::new(store)
        .batch_size(1)
        .max_concurrent_batches(2)
        .idle_interval(Duration::from_millis(10))
        .workload(workload)
        .outcome_policy(FixedPolicy(Outcome::Success))
        .build();

    let store = scheduler.store();
    let handle = tokio::spawn(async move { scheduler.run().await });

    wait_for_count(store.as_ref(), TaskState::Success, 8).await;
    handle.abort();

    let observed = max_observed.load(Ordering::SeqCst);
    assert!(observed >= 1);
    assert!(observed <= 2, "observed {} concurrent batches", observed);
}

#[tokio::test]
async fn test_recovery_sweep_requeues_stranded_tasks() {
    let store = setup_store().await;
    let now = Utc::now();

    // A previous run claimed these an hour ago and died.
    store
        .insert(now - ChronoDuration::hours(2), "stranded")
        .await
        .unwrap();
    store
        .insert(now - ChronoDuration::hours(2), "stranded")
        .await
        .unwrap();
    let claimed = store.claim_due(now - ChronoDuration::hours(1)).await.unwrap();
    assert_eq!(claimed.len(), 2);

    let scheduler = SchedulerBuilder::new(store)
        .batch_size(4)
        .idle_interval(Duration::from_millis(10))
        .workload(NoopWorkload)
        .outcome_policy(FixedPolicy(Outcome::Success))
        .requeue_hidden_older_than(Duration::from_secs(30 * 60))
        .build();

    let store = scheduler.store();
    let handle = tokio::spawn(async move { scheduler.run().await });

    // The sweep re-queues both, and the same cycle family picks them up.
    wait_for_count(store.as_ref(), TaskState::Success, 2).await;
    assert_eq!(store.count_in_state(TaskState::Hidden).await.unwrap(), 0);

    handle.abort();
}

/// Store whose every operation fails.
struct BrokenStore;

#[async_trait]
impl TaskStore for BrokenStore {
    async fn insert(&self, _: DateTime<Utc>, _: &str) -> Result<TaskId, StoreError> {
        Err(StoreError::Storage("connection lost".to_string()))
    }

    async fn fetch_due(&self, _: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        Err(StoreError::Storage("connection lost".to_string()))
    }

    async fn bulk_set_state(&self, _: &[TaskId], _: TaskState) -> Result<(), StoreError> {
        Err(StoreError::Storage("connection lost".to_string()))
    }

    async fn count_in_state(&self, _: TaskState) -> Result<i64, StoreError> {
        Err(StoreError::Storage("connection lost".to_string()))
    }
}

#[tokio::test]
async fn test_store_error_stops_the_loop() {
    let scheduler = SchedulerBuilder::new(BrokenStore)
        .idle_interval(Duration::from_millis(10))
        .workload(NoopWorkload)
        .build();

    let result = tokio::time::timeout(Duration::from_secs(1), scheduler.run())
        .await
        .expect("scheduler should stop on the first store error");
    assert!(matches!(result, Err(StoreError::Storage(_))));
}
