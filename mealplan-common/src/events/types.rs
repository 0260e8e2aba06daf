//! Supporting types for change events

use serde::{Deserialize, Serialize};

/// Discriminator of a data-change message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeEventType {
    MealPlanFinalized,
    MealPlanGroceryListItemCreated,
    MealPlanGroceryListItemUpdated,
    MealPlanTaskCreated,
    MealPlanTaskStatusChanged,
}

impl ChangeEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeEventType::MealPlanFinalized => "meal_plan_finalized",
            ChangeEventType::MealPlanGroceryListItemCreated => "meal_plan_grocery_list_item_created",
            ChangeEventType::MealPlanGroceryListItemUpdated => "meal_plan_grocery_list_item_updated",
            ChangeEventType::MealPlanTaskCreated => "meal_plan_task_created",
            ChangeEventType::MealPlanTaskStatusChanged => "meal_plan_task_status_changed",
        }
    }
}

impl std::fmt::Display for ChangeEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The option an event settled on during finalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChosenOptionSummary {
    pub meal_plan_event_id: String,
    pub meal_plan_option_id: String,
    pub tie_broken: bool,
}
