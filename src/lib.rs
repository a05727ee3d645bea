//! # Taskmill
//!
//! A polling batch task scheduler. Tasks live in a durable store with a due
//! time and a lifecycle state; the scheduler polls for due tasks, claims them
//! by marking them hidden, fans them out to concurrently running fixed-size
//! batches, collects every outcome, and writes the final success or failure
//! state back in bulk.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use taskmill::{SchedulerBuilder, SqliteTaskStore};
//! use sqlx::SqlitePool;
//!
//! let pool = SqlitePool::connect("tasks.db").await?;
//! let store = SqliteTaskStore::new(pool);
//! store.run_migrations().await?;
//!
//! let scheduler = SchedulerBuilder::new(store)
//!     .batch_size(4)
//!     .idle_interval(std::time::Duration::from_secs(60))
//!     .build();
//!
//! scheduler.run().await?; // returns only on a store error
//! ```
//!
//! ## Lifecycle
//!
//! `queue → hidden → success | failure`. A claim moves a task to `hidden` so
//! no later poll can pick it up again; `success` and `failure` are terminal.
//! An optional recovery sweep re-queues `hidden` tasks whose claim has gone
//! stale, for runs interrupted mid-cycle.
//!
//! ## Feature Flags
//!
//! - `sqlite` (default) - SQLite-backed task store via sqlx

pub mod batch;
pub mod collector;
pub mod outcome;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod task;

#[cfg(feature = "sqlite")]
pub mod sqlite_store;

pub use collector::CycleOutcome;
pub use outcome::{
    FixedPolicy, NoopWorkload, Outcome, OutcomePolicy, RandomPolicy, SleepWorkload, TaskOutcome,
    Workload,
};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerConfig};
pub use store::{StoreError, TaskStore};
pub use task::{Task, TaskId, TaskState};

#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteTaskStore;
