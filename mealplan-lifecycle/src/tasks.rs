//! Prep task generation and status changes
//!
//! A finalized plan gets one task per declared recipe prep task of each
//! chosen option's recipes, scheduled relative to the event start.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use mealplan_common::db::{
    retry_on_transient, MealPlan, MealPlanTask, MealPlanTaskDatabaseCreationInput,
    MealPlanTaskStatusChangeRequestInput, RetryPolicy,
};
use mealplan_common::events::{
    publish_best_effort, ChangePayload, ChangePublisher, DataChangeMessage, SYSTEM_USER_ID,
};
use mealplan_common::{time, Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::Store;
use crate::until_cancelled;

/// Task creation inputs for every prep task of every chosen recipe
///
/// A recipe used twice by the same option yields its prep tasks once.
pub fn derive_tasks(plan: &MealPlan) -> Result<Vec<MealPlanTaskDatabaseCreationInput>> {
    let mut seen = HashSet::new();
    let mut inputs = Vec::new();

    for (event, option) in plan.chosen_options() {
        let meal = option.meal.as_ref().ok_or_else(|| {
            Error::Internal(format!(
                "meal {} for option {} was not loaded",
                option.meal_id, option.id
            ))
        })?;

        for component in &meal.components {
            let recipe = &component.recipe;
            for prep_task in &recipe.prep_tasks {
                if !seen.insert((option.id.as_str(), prep_task.id.as_str())) {
                    continue;
                }

                let cannot_complete_before = prep_task
                    .maximum_time_buffer_seconds
                    .map(|max| event.starts_at - Duration::seconds(i64::from(max)));
                let cannot_complete_after = event.starts_at
                    - Duration::seconds(i64::from(prep_task.minimum_time_buffer_seconds));

                inputs.push(MealPlanTaskDatabaseCreationInput {
                    id: Uuid::new_v4().to_string(),
                    belongs_to_meal_plan_option: option.id.clone(),
                    recipe_prep_task_id: prep_task.id.clone(),
                    creation_explanation: format!(
                        "{} for {} in {} ({} on {})",
                        prep_task.name,
                        recipe.name,
                        meal.name,
                        event.meal_name,
                        event.starts_at.format("%Y-%m-%d")
                    ),
                    status_explanation: String::new(),
                    assigned_to_user: None,
                    storage_type: prep_task.storage_type.clone(),
                    explicit_storage_instructions: prep_task.explicit_storage_instructions.clone(),
                    minimum_time_buffer_seconds: prep_task.minimum_time_buffer_seconds,
                    maximum_time_buffer_seconds: prep_task.maximum_time_buffer_seconds,
                    cannot_complete_before,
                    cannot_complete_after: Some(cannot_complete_after),
                });
            }
        }
    }

    Ok(inputs)
}

pub struct TaskGenerator {
    store: Store,
    publisher: Arc<dyn ChangePublisher>,
    retry: RetryPolicy,
}

impl TaskGenerator {
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

    /// Derive and store the tasks of one finalized plan
    ///
    /// Returns `None` when the tasks were already created. Emits one
    /// `meal_plan_task_created` per stored task.
    pub async fn create_tasks_for_plan(
        &self,
        plan: &MealPlan,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<MealPlanTask>>> {
        if !plan.is_finalized() {
            return Err(Error::Conflict(format!(
                "meal plan {} is not finalized; no tasks yet",
                plan.id
            )));
        }

        let inputs = derive_tasks(plan)?;

        let created = until_cancelled(
            cancel,
            retry_on_transient("meal plan task creation", self.retry, || {
                self.store
                    .create_meal_plan_tasks_for_meal_plan(&plan.id, &inputs, time::now())
            }),
        )
        .await?;

        let Some(tasks) = created else {
            debug!(meal_plan_id = %plan.id, "Tasks created elsewhere");
            return Ok(None);
        };

        for task in &tasks {
            publish_best_effort(
                self.publisher.as_ref(),
                DataChangeMessage::new(
                    SYSTEM_USER_ID,
                    &plan.belongs_to_household,
                    &plan.id,
                    ChangePayload::MealPlanTaskCreated {
                        meal_plan_task: task.clone(),
                    },
                ),
            );
        }

        info!(
            meal_plan_id = %plan.id,
            household_id = %plan.belongs_to_household,
            task_count = tasks.len(),
            "Meal plan tasks created"
        );

        Ok(Some(tasks))
    }

    /// Apply a status change and emit `meal_plan_task_status_changed`
    ///
    /// Disallowed transitions fail with `Conflict` and emit nothing.
    pub async fn change_task_status(
        &self,
        household_id: &str,
        input: &MealPlanTaskStatusChangeRequestInput,
    ) -> Result<MealPlanTask> {
        let (task, previous_status) = retry_on_transient("meal plan task status change", self.retry, || {
            self.store
                .change_meal_plan_task_status(household_id, input, time::now())
        })
        .await?;

        publish_best_effort(
            self.publisher.as_ref(),
            DataChangeMessage::new(
                &input.changed_by_user,
                household_id,
                &task.belongs_to_meal_plan,
                ChangePayload::MealPlanTaskStatusChanged {
                    meal_plan_task: task.clone(),
                    previous_status,
                },
            ),
        );

        Ok(task)
    }
}
