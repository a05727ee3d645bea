//! Task outcomes, outcome policies and the workload seam.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;

use crate::task::Task;

/// Result of executing one task's workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// A task paired with its outcome; the message batch runners emit onto the
/// shared channel.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task: Task,
    pub outcome: Outcome,
}

/// Decides the outcome of a task after its workload has run.
///
/// One policy instance is shared by every batch runner of a cycle, so
/// implementations must be safe under concurrent calls.
pub trait OutcomePolicy: Send + Sync {
    fn decide(&self, task: &Task) -> Outcome;
}

/// Coin-flip policy.
///
/// The generator sits behind a mutex; batch runners run concurrently and an
/// unguarded shared generator would race.
pub struct RandomPolicy {
    rng: Mutex<StdRng>,
}

impl RandomPolicy {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Seeded variant for reproducible runs.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl OutcomePolicy for RandomPolicy {
    fn decide(&self, _task: &Task) -> Outcome {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        if rng.gen_bool(0.5) {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

/// Policy that returns the same outcome for every task. Deterministic stand-in
/// for tests and demos.
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy(pub Outcome);

impl OutcomePolicy for FixedPolicy {
    fn decide(&self, _task: &Task) -> Outcome {
        self.0
    }
}

/// The work a task stands for. The scheduler invokes this once per task,
/// sequentially within a batch.
#[async_trait]
pub trait Workload: Send + Sync {
    async fn run(&self, task: &Task);
}

/// Stand-in workload that sleeps for a fixed duration.
pub struct SleepWorkload(pub Duration);

#[async_trait]
impl Workload for SleepWorkload {
    async fn run(&self, _task: &Task) {
        tokio::time::sleep(self.0).await;
    }
}

/// Workload that returns immediately. For tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWorkload;

#[async_trait]
impl Workload for NoopWorkload {
    async fn run(&self, _task: &Task) {}
}
