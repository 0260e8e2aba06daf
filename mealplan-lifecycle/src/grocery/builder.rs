//! Grocery list initialization and item updates

use std::sync::Arc;

use mealplan_common::db::{
    retry_on_transient, GroceryListItemStatus, MealPlan, MealPlanGroceryListItem,
    MealPlanGroceryListItemDatabaseCreationInput, MealPlanGroceryListItemUpdateRequestInput,
    RetryPolicy,
};
use mealplan_common::events::{
    publish_best_effort, ChangePayload, ChangePublisher, DataChangeMessage, SYSTEM_USER_ID,
};
use mealplan_common::{time, Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::{aggregate, requirements_for_plan, ConversionCatalog};
use crate::db::{GroceryListInitialization, Store};
use crate::until_cancelled;

pub struct GroceryListBuilder {
    store: Store,
    catalog: Arc<ConversionCatalog>,
    publisher: Arc<dyn ChangePublisher>,
    retry: RetryPolicy,
}

impl GroceryListBuilder {
    pub fn new(
        store: Store,
        catalog: Arc<ConversionCatalog>,
        publisher: Arc<dyn ChangePublisher>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            catalog,
            publisher,
            retry,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Consolidated creation inputs for a finalized plan, one per (ingredient, unit)
    pub async fn build_items(&self, plan: &MealPlan) -> Result<Vec<MealPlanGroceryListItemDatabaseCreationInput>> {
        if !plan.is_finalized() {
            return Err(Error::Conflict(format!(
                "meal plan {} is not finalized; no grocery list yet",
                plan.id
            )));
        }

        let requirements = requirements_for_plan(plan)?;
        let conversions = self
            .catalog
            .table_for(requirements.iter().map(|r| r.measurement_unit_id.as_str()))
            .await?;

        Ok(aggregate(&requirements, &conversions)
            .into_iter()
            .map(|line| MealPlanGroceryListItemDatabaseCreationInput {
                id: Uuid::new_v4().to_string(),
                belongs_to_meal_plan: plan.id.clone(),
                valid_ingredient: line.ingredient_id,
                valid_measurement_unit: line.measurement_unit_id,
                minimum_quantity_needed: line.minimum,
                maximum_quantity_needed: line.maximum,
                status: GroceryListItemStatus::Unknown,
                status_explanation: String::new(),
            })
            .collect())
    }

    /// Build and store the grocery list of one plan
    ///
    /// Returns `None` when another builder already initialized it. Emits one
    /// `meal_plan_grocery_list_item_created` per inserted item and one
    /// `meal_plan_grocery_list_item_updated` per existing item that absorbed
    /// a computed line.
    pub async fn initialize_for_plan(
        &self,
        plan: &MealPlan,
        cancel: &CancellationToken,
    ) -> Result<Option<GroceryListInitialization>> {
        let inputs = until_cancelled(cancel, self.build_items(plan)).await?;

        let stored = until_cancelled(
            cancel,
            retry_on_transient("grocery list initialization", self.retry, || {
                self.store
                    .create_meal_plan_grocery_list_items_for_meal_plan(&plan.id, &inputs, time::now())
            }),
        )
        .await?;

        let Some(outcome) = stored else {
            debug!(meal_plan_id = %plan.id, "Grocery list initialized elsewhere");
            return Ok(None);
        };

        let created = outcome.created.iter().map(|item| ChangePayload::MealPlanGroceryListItemCreated {
            grocery_list_item: item.clone(),
        });
        let merged = outcome.merged.iter().map(|item| ChangePayload::MealPlanGroceryListItemUpdated {
            grocery_list_item: item.clone(),
        });

        let mut published = 0usize;
        for payload in created.chain(merged) {
            let message =
                DataChangeMessage::new(SYSTEM_USER_ID, &plan.belongs_to_household, &plan.id, payload);
            if publish_best_effort(self.publisher.as_ref(), message) {
                published += 1;
            }
        }

        info!(
            meal_plan_id = %plan.id,
            household_id = %plan.belongs_to_household,
            created_count = outcome.created.len(),
            merged_count = outcome.merged.len(),
            published_count = published,
            "Grocery list initialized"
        );

        Ok(Some(outcome))
    }

    /// Patch one item on behalf of `user_id` and emit `meal_plan_grocery_list_item_updated`
    pub async fn update_item(
        &self,
        plan_id: &str,
        household_id: &str,
        item_id: &str,
        patch: &MealPlanGroceryListItemUpdateRequestInput,
        user_id: &str,
    ) -> Result<MealPlanGroceryListItem> {
        let item = retry_on_transient("grocery list item update", self.retry, || {
            self.store
                .update_meal_plan_grocery_list_item(plan_id, household_id, item_id, patch, time::now())
        })
        .await?;

        publish_best_effort(
            self.publisher.as_ref(),
            DataChangeMessage::new(
                user_id,
                household_id,
                plan_id,
                ChangePayload::MealPlanGroceryListItemUpdated {
                    grocery_list_item: item.clone(),
                },
            ),
        );

        Ok(item)
    }
}
