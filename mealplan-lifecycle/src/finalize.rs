//! Finalization coordinator
//!
//! Wraps the store's atomic finalization with transient-error retry,
//! cancellation and the post-commit `meal_plan_finalized` event.

use std::sync::Arc;

use mealplan_common::db::{retry_on_transient, RetryPolicy};
use mealplan_common::events::{publish_best_effort, ChangePayload, ChangePublisher, DataChangeMessage};
use mealplan_common::{time, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::db::{FinalizationOutcome, FinalizeRequest, Store};
use crate::until_cancelled;

pub struct FinalizationCoordinator {
    store: Store,
    publisher: Arc<dyn ChangePublisher>,
    retry: RetryPolicy,
}

impl FinalizationCoordinator {
    pub fn new(store: Store, publisher: Arc<dyn ChangePublisher>, retry: RetryPolicy) -> Self {
        Self {
            store,
            publisher,
            retry,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Finalize one plan; returns whether this call changed it
    ///
    /// A racing finalizer that loses the writer lock retries, sees the plan
    /// finalized and returns `false`. Exactly one caller publishes.
    pub async fn attempt_finalize(
        &self,
        plan_id: &str,
        household_id: &str,
        request: &FinalizeRequest,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let outcome = self
            .finalize_with_outcome(plan_id, household_id, request, cancel)
            .await?;
        Ok(outcome.changed)
    }

    /// Same as [`attempt_finalize`](Self::attempt_finalize), returning the chosen options
    pub async fn finalize_with_outcome(
        &self,
        plan_id: &str,
        household_id: &str,
        request: &FinalizeRequest,
        cancel: &CancellationToken,
    ) -> Result<FinalizationOutcome> {
        let outcome = until_cancelled(
            cancel,
            retry_on_transient("meal plan finalization", self.retry, || {
                self.store
                    .attempt_to_finalize_meal_plan(plan_id, household_id, request, time::now())
            }),
        )
        .await?;

        if !outcome.changed {
            debug!(meal_plan_id = %plan_id, "Meal plan not finalized by this attempt");
            return Ok(outcome);
        }

        info!(
            meal_plan_id = %plan_id,
            household_id = %household_id,
            actor = request.actor(),
            chosen_count = outcome.chosen_options.len(),
            "Meal plan finalized"
        );

        publish_best_effort(
            self.publisher.as_ref(),
            DataChangeMessage::new(
                request.actor(),
                household_id,
                plan_id,
                ChangePayload::MealPlanFinalized {
                    chosen_options: outcome.chosen_options.clone(),
                },
            ),
        );

        Ok(outcome)
    }
}
