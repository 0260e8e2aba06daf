//! Background workers
//!
//! Each worker performs one sweep per scheduler tick:
//! - [`Finalizer`]: finalizes plans whose voting deadline has passed
//! - [`GroceryListInitializer`]: builds grocery lists for finalized plans
//! - [`TaskCreator`]: generates prep tasks for finalized plans
//!
//! Sweeps are safe to run concurrently and repeatedly; the store's flags and
//! status checks make every per-plan step idempotent. Shutdown is observed
//! between plans, never in the middle of one.

mod finalizer;
mod grocery_list_initializer;
mod scheduler;
mod task_creator;

pub use finalizer::Finalizer;
pub use grocery_list_initializer::GroceryListInitializer;
pub use scheduler::run_periodically;
pub use task_creator::TaskCreator;

use std::sync::atomic::{AtomicU64, Ordering};

use mealplan_common::Error;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// A plan a sweep could not advance
#[derive(Debug, Clone, Serialize)]
pub struct PlanFailure {
    pub meal_plan_id: String,
    pub code: &'static str,
    pub message: String,
}

impl PlanFailure {
    fn new(meal_plan_id: &str, error: &Error) -> Self {
        Self {
            meal_plan_id: meal_plan_id.to_string(),
            code: error.code(),
            message: error.to_string(),
        }
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Plans returned by discovery
    pub examined: usize,
    /// Plans this sweep advanced
    pub changed_count: usize,
    pub failures: Vec<PlanFailure>,
    /// Sweep stopped early on shutdown
    pub interrupted: bool,
}

impl SweepReport {
    fn new(examined: usize) -> Self {
        Self {
            examined,
            ..Self::default()
        }
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }
}

/// Lifetime counters of one worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    iterations: AtomicU64,
    changed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    pub iterations: u64,
    pub changed: u64,
    pub failed: u64,
}

impl WorkerStats {
    pub fn record(&self, report: &SweepReport) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        self.changed
            .fetch_add(report.changed_count as u64, Ordering::Relaxed);
        self.failed
            .fetch_add(report.failed_count() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            iterations: self.iterations.load(Ordering::Relaxed),
            changed: self.changed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Per-plan token: shutdown is observed between plans, so a plan in flight finishes
fn plan_token() -> CancellationToken {
    CancellationToken::new()
}

/// Whether a per-plan error should end the sweep instead of being recorded
fn ends_sweep(error: &Error) -> bool {
    matches!(
        error,
        Error::Cancelled
            | Error::Database(sqlx::Error::PoolClosed)
            | Error::Database(sqlx::Error::Io(_))
            | Error::Database(sqlx::Error::Tls(_))
    )
}
