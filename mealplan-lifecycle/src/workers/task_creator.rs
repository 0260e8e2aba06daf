//! Prep task creation sweep

use std::sync::Arc;

use mealplan_common::db::{retry_on_transient, RetryPolicy};
use mealplan_common::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{ends_sweep, plan_token, PlanFailure, SweepReport};
use crate::tasks::TaskGenerator;

pub struct TaskCreator {
    generator: Arc<TaskGenerator>,
    retry: RetryPolicy,
}

impl TaskCreator {
    pub const NAME: &'static str = "task_creator";

    pub fn new(generator: Arc<TaskGenerator>, retry: RetryPolicy) -> Self {
        Self { generator, retry }
    }

    /// Create prep tasks for every finalized plan that has none yet
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<SweepReport> {
        let store = self.generator.store();
        let plans = retry_on_transient("plans without tasks discovery", self.retry, || {
            store.get_finalized_meal_plans_without_tasks()
        })
        .await?;

        let mut report = SweepReport::new(plans.len());

        for plan in &plans {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            match self.generator.create_tasks_for_plan(plan, &plan_token()).await {
                Ok(Some(_)) => report.changed_count += 1,
                Ok(None) => {}
                Err(e) if ends_sweep(&e) => return Err(e),
                Err(e) => {
                    error!(meal_plan_id = %plan.id, error = %e, "Failed to create meal plan tasks");
                    report.failures.push(PlanFailure::new(&plan.id, &e));
                }
            }
        }

        info!(
            worker = Self::NAME,
            examined = report.examined,
            changed_count = report.changed_count,
            failed_count = report.failed_count(),
            interrupted = report.interrupted,
            "Task creation sweep complete"
        );

        Ok(report)
    }
}
