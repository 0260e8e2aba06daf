//! Grocery list initialization sweep

use std::sync::Arc;

use mealplan_common::db::{retry_on_transient, RetryPolicy};
use mealplan_common::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{ends_sweep, plan_token, PlanFailure, SweepReport};
use crate::grocery::GroceryListBuilder;

pub struct GroceryListInitializer {
    builder: Arc<GroceryListBuilder>,
    retry: RetryPolicy,
}

impl GroceryListInitializer {
    pub const NAME: &'static str = "grocery_list_initializer";

    pub fn new(builder: Arc<GroceryListBuilder>, retry: RetryPolicy) -> Self {
        Self { builder, retry }
    }

    /// Build the grocery list of every finalized plan that lacks one
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<SweepReport> {
        let store = self.builder.store();
        let plans = retry_on_transient("uninitialized grocery list discovery", self.retry, || {
            store.get_finalized_meal_plans_with_uninitialized_grocery_lists()
        })
        .await?;

        let mut report = SweepReport::new(plans.len());

        for plan in &plans {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            match self.builder.initialize_for_plan(plan, &plan_token()).await {
                Ok(Some(_)) => report.changed_count += 1,
                Ok(None) => {}
                Err(e) if ends_sweep(&e) => return Err(e),
                Err(e) => {
                    error!(meal_plan_id = %plan.id, error = %e, "Failed to initialize grocery list");
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
            "Grocery list sweep complete"
        );

        Ok(report)
    }
}
