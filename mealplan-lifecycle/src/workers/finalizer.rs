//! Finalization sweep

use std::sync::Arc;

use mealplan_common::db::{retry_on_transient, RetryPolicy};
use mealplan_common::{time, Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{ends_sweep, plan_token, PlanFailure, SweepReport};
use crate::db::FinalizeRequest;
use crate::finalize::FinalizationCoordinator;

pub struct Finalizer {
    coordinator: Arc<FinalizationCoordinator>,
    retry: RetryPolicy,
}

impl Finalizer {
    pub const NAME: &'static str = "finalizer";

    pub fn new(coordinator: Arc<FinalizationCoordinator>, retry: RetryPolicy) -> Self {
        Self { coordinator, retry }
    }

    /// Finalize every plan still awaiting votes past its deadline
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<SweepReport> {
        let store = self.coordinator.store();
        let plans = retry_on_transient("expired voting period discovery", self.retry, || {
            store.get_unfinalized_meal_plans_with_expired_voting_periods(time::now())
        })
        .await?;

        let mut report = SweepReport::new(plans.len());

        for plan in &plans {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            let result = self
                .coordinator
                .attempt_finalize(
                    &plan.id,
                    &plan.belongs_to_household,
                    &FinalizeRequest::Sweeper,
                    &plan_token(),
                )
                .await;

            match result {
                Ok(true) => report.changed_count += 1,
                Ok(false) => {}
                Err(e) if ends_sweep(&e) => return Err(e),
                Err(e @ Error::InsufficientVotes { .. }) => {
                    warn!(meal_plan_id = %plan.id, error = %e, "Meal plan cannot be finalized yet");
                    report.failures.push(PlanFailure::new(&plan.id, &e));
                }
                Err(e) => {
                    error!(meal_plan_id = %plan.id, error = %e, "Failed to finalize meal plan");
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
            "Finalization sweep complete"
        );

        Ok(report)
    }
}
