//! Database models
//!
//! Entities of the meal-plan lifecycle plus the read-only recipe tree the
//! workers walk. Every entity carries an opaque string id, a creation instant
//! and optional last-updated / archived instants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Voting status of a meal plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealPlanStatus {
    AwaitingVotes,
    Finalized,
}

impl MealPlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MealPlanStatus::AwaitingVotes => "awaiting_votes",
            MealPlanStatus::Finalized => "finalized",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "awaiting_votes" => Some(MealPlanStatus::AwaitingVotes),
            "finalized" => Some(MealPlanStatus::Finalized),
            _ => None,
        }
    }
}

/// Ranked-ballot method used to pick each event's winning option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionMethod {
    #[default]
    Schulze,
    InstantRunoff,
}

impl ElectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElectionMethod::Schulze => "schulze",
            ElectionMethod::InstantRunoff => "instant_runoff",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "schulze" => Some(ElectionMethod::Schulze),
            "instant_runoff" | "instant-runoff" => Some(ElectionMethod::InstantRunoff),
            _ => None,
        }
    }
}

impl std::fmt::Display for ElectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which meal of the day an event plans for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealName {
    Breakfast,
    SecondBreakfast,
    Brunch,
    Lunch,
    Supper,
    Dinner,
}

impl MealName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MealName::Breakfast => "breakfast",
            MealName::SecondBreakfast => "second_breakfast",
            MealName::Brunch => "brunch",
            MealName::Lunch => "lunch",
            MealName::Supper => "supper",
            MealName::Dinner => "dinner",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "breakfast" => Some(MealName::Breakfast),
            "second_breakfast" => Some(MealName::SecondBreakfast),
            "brunch" => Some(MealName::Brunch),
            "lunch" => Some(MealName::Lunch),
            "supper" => Some(MealName::Supper),
            "dinner" => Some(MealName::Dinner),
            _ => None,
        }
    }
}

impl std::fmt::Display for MealName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a generated prep task
///
/// Allowed transitions:
/// - unfinished  -> in_progress | ignored | postponed
/// - in_progress -> finished | postponed | ignored
/// - postponed   -> in_progress | ignored
/// - finished, ignored: terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealPlanTaskStatus {
    Unfinished,
    InProgress,
    Ignored,
    Postponed,
    Finished,
}

impl MealPlanTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MealPlanTaskStatus::Unfinished => "unfinished",
            MealPlanTaskStatus::InProgress => "in_progress",
            MealPlanTaskStatus::Ignored => "ignored",
            MealPlanTaskStatus::Postponed => "postponed",
            MealPlanTaskStatus::Finished => "finished",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unfinished" => Some(MealPlanTaskStatus::Unfinished),
            "in_progress" => Some(MealPlanTaskStatus::InProgress),
            "ignored" => Some(MealPlanTaskStatus::Ignored),
            "postponed" => Some(MealPlanTaskStatus::Postponed),
            "finished" => Some(MealPlanTaskStatus::Finished),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MealPlanTaskStatus::Finished | MealPlanTaskStatus::Ignored)
    }

    pub fn can_transition_to(&self, next: MealPlanTaskStatus) -> bool {
        use MealPlanTaskStatus::*;
        matches!(
            (self, next),
            (Unfinished, InProgress)
                | (Unfinished, Ignored)
                | (Unfinished, Postponed)
                | (InProgress, Finished)
                | (InProgress, Postponed)
                | (InProgress, Ignored)
                | (Postponed, InProgress)
                | (Postponed, Ignored)
        )
    }
}

impl std::fmt::Display for MealPlanTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shopping state of a grocery list item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroceryListItemStatus {
    Unknown,
    AlreadyOwned,
    Needs,
    Unavailable,
    Acquired,
}

impl GroceryListItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroceryListItemStatus::Unknown => "unknown",
            GroceryListItemStatus::AlreadyOwned => "already_owned",
            GroceryListItemStatus::Needs => "needs",
            GroceryListItemStatus::Unavailable => "unavailable",
            GroceryListItemStatus::Acquired => "acquired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unknown" => Some(GroceryListItemStatus::Unknown),
            "already_owned" => Some(GroceryListItemStatus::AlreadyOwned),
            "needs" => Some(GroceryListItemStatus::Needs),
            "unavailable" => Some(GroceryListItemStatus::Unavailable),
            "acquired" => Some(GroceryListItemStatus::Acquired),
            _ => None,
        }
    }
}

// ========================================
// Meal plans
// ========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlan {
    pub id: String,
    pub notes: String,
    pub status: MealPlanStatus,
    pub voting_deadline: DateTime<Utc>,
    pub election_method: ElectionMethod,
    pub grocery_list_initialized: bool,
    pub tasks_created: bool,
    pub belongs_to_household: String,
    pub created_by_user: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub events: Vec<MealPlanEvent>,
}

impl MealPlan {
    pub fn is_finalized(&self) -> bool {
        self.status == MealPlanStatus::Finalized
    }

    pub fn voting_deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.voting_deadline <= now
    }

    /// Chosen options paired with their events, in event order
    pub fn chosen_options(&self) -> impl Iterator<Item = (&MealPlanEvent, &MealPlanOption)> {
        self.events
            .iter()
            .filter_map(|event| event.chosen_option().map(|option| (event, option)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlanEvent {
    pub id: String,
    pub notes: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub meal_name: MealName,
    pub belongs_to_meal_plan: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub options: Vec<MealPlanOption>,
}

impl MealPlanEvent {
    pub fn chosen_option(&self) -> Option<&MealPlanOption> {
        self.options.iter().find(|option| option.chosen)
    }

    pub fn vote_count(&self) -> usize {
        self.options.iter().map(|option| option.votes.len()).sum()
    }

    /// Votes that rank an option; abstentions express no preference
    pub fn ranked_vote_count(&self) -> usize {
        self.options
            .iter()
            .flat_map(|option| option.votes.iter())
            .filter(|vote| !vote.abstain)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlanOption {
    pub id: String,
    pub meal_id: String,
    pub meal_scale: f64,
    pub chosen: bool,
    pub tie_broken: bool,
    pub assigned_cook: Option<String>,
    pub assigned_dishwasher: Option<String>,
    pub notes: String,
    pub belongs_to_meal_plan_event: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub votes: Vec<MealPlanOptionVote>,
    /// Populated only by the eager loaders used by the grocery and task workers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meal: Option<Meal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlanOptionVote {
    pub id: String,
    /// 0 = favorite
    pub rank: u32,
    pub abstain: bool,
    pub notes: String,
    pub by_user: String,
    pub belongs_to_meal_plan_option: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlanDatabaseCreationInput {
    pub id: String,
    pub notes: String,
    pub voting_deadline: DateTime<Utc>,
    /// Falls back to the configured default when omitted
    pub election_method: Option<ElectionMethod>,
    pub belongs_to_household: String,
    pub created_by_user: String,
    pub events: Vec<MealPlanEventDatabaseCreationInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlanEventDatabaseCreationInput {
    pub id: String,
    pub notes: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub meal_name: MealName,
    pub options: Vec<MealPlanOptionDatabaseCreationInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlanOptionDatabaseCreationInput {
    pub id: String,
    pub meal_id: String,
    pub meal_scale: f64,
    pub notes: String,
    pub assigned_cook: Option<String>,
    pub assigned_dishwasher: Option<String>,
}

impl MealPlanDatabaseCreationInput {
    /// Structural validation; deadline freshness is checked against `now`
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        if self.id.is_empty() || self.belongs_to_household.is_empty() {
            return Err(Error::InvalidInput(
                "meal plan requires an id and a household".to_string(),
            ));
        }
        if self.voting_deadline <= now {
            return Err(Error::InvalidInput(format!(
                "voting deadline {} is not in the future",
                self.voting_deadline
            )));
        }
        if self.events.is_empty() {
            return Err(Error::InvalidInput(
                "meal plan requires at least one event".to_string(),
            ));
        }

        for event in &self.events {
            if event.ends_at <= event.starts_at {
                return Err(Error::InvalidInput(format!(
                    "event {} ends before it starts",
                    event.id
                )));
            }
            if event.options.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "event {} requires at least one option",
                    event.id
                )));
            }
            for option in &event.options {
                if !(option.meal_scale.is_finite() && option.meal_scale > 0.0) {
                    return Err(Error::InvalidInput(format!(
                        "option {} has invalid meal scale {}",
                        option.id, option.meal_scale
                    )));
                }
            }
        }

        Ok(())
    }
}

/// One user's ballot for one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlanOptionVotesCreationInput {
    pub by_user: String,
    pub votes: Vec<MealPlanOptionVoteCreationInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlanOptionVoteCreationInput {
    pub id: String,
    pub belongs_to_meal_plan_option: String,
    pub rank: u32,
    pub abstain: bool,
    pub notes: String,
}

impl MealPlanOptionVotesCreationInput {
    /// Each option at most once; non-abstain ranks form the dense permutation 0..k-1
    pub fn validate(&self) -> Result<()> {
        if self.by_user.is_empty() {
            return Err(Error::InvalidInput("ballot requires a voter".to_string()));
        }
        if self.votes.is_empty() {
            return Err(Error::InvalidInput("ballot contains no votes".to_string()));
        }

        let mut seen_options = std::collections::HashSet::new();
        for vote in &self.votes {
            if !seen_options.insert(vote.belongs_to_meal_plan_option.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "option {} voted more than once",
                    vote.belongs_to_meal_plan_option
                )));
            }
        }

        let mut ranks: Vec<u32> = self
            .votes
            .iter()
            .filter(|vote| !vote.abstain)
            .map(|vote| vote.rank)
            .collect();
        ranks.sort_unstable();
        if ranks.iter().enumerate().any(|(i, rank)| *rank as usize != i) {
            return Err(Error::InvalidInput(format!(
                "ranks {:?} are not a dense permutation starting at 0",
                ranks
            )));
        }

        Ok(())
    }
}

// ========================================
// Tasks
// ========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlanTask {
    pub id: String,
    pub belongs_to_meal_plan: String,
    pub belongs_to_meal_plan_option: String,
    pub recipe_prep_task_id: String,
    pub status: MealPlanTaskStatus,
    pub creation_explanation: String,
    pub status_explanation: String,
    pub assigned_to_user: Option<String>,
    pub storage_type: Option<String>,
    pub explicit_storage_instructions: String,
    pub minimum_time_buffer_seconds: u32,
    pub maximum_time_buffer_seconds: Option<u32>,
    pub cannot_complete_before: Option<DateTime<Utc>>,
    pub cannot_complete_after: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlanTaskDatabaseCreationInput {
    pub id: String,
    pub belongs_to_meal_plan_option: String,
    pub recipe_prep_task_id: String,
    pub creation_explanation: String,
    pub status_explanation: String,
    pub assigned_to_user: Option<String>,
    pub storage_type: Option<String>,
    pub explicit_storage_instructions: String,
    pub minimum_time_buffer_seconds: u32,
    pub maximum_time_buffer_seconds: Option<u32>,
    pub cannot_complete_before: Option<DateTime<Utc>>,
    pub cannot_complete_after: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlanTaskStatusChangeRequestInput {
    pub id: String,
    pub belongs_to_meal_plan: String,
    pub status: MealPlanTaskStatus,
    pub status_explanation: Option<String>,
    pub assigned_to_user: Option<String>,
    pub changed_by_user: String,
}

// ========================================
// Grocery list
// ========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlanGroceryListItem {
    pub id: String,
    pub belongs_to_meal_plan: String,
    pub valid_ingredient: String,
    pub valid_measurement_unit: String,
    pub minimum_quantity_needed: f64,
    pub maximum_quantity_needed: Option<f64>,
    pub quantity_purchased: Option<f64>,
    pub purchased_measurement_unit: Option<String>,
    pub purchased_upc: Option<String>,
    pub purchase_price: Option<f64>,
    pub status_explanation: String,
    pub status: GroceryListItemStatus,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl MealPlanGroceryListItem {
    fn has_purchase_details(&self) -> bool {
        self.quantity_purchased.is_some()
            || self.purchased_measurement_unit.is_some()
            || self.purchased_upc.is_some()
            || self.purchase_price.is_some()
    }

    /// Merge a patch into this item
    ///
    /// Fields absent from the patch keep their current value. Purchase
    /// details may only be present on an acquired item.
    pub fn update(&mut self, input: &MealPlanGroceryListItemUpdateRequestInput) -> Result<()> {
        let mut merged = self.clone();

        if let Some(status) = input.status {
            merged.status = status;
        }
        if let Some(explanation) = &input.status_explanation {
            merged.status_explanation = explanation.clone();
        }
        if let Some(quantity) = input.quantity_purchased {
            if !(quantity.is_finite() && quantity >= 0.0) {
                return Err(Error::InvalidInput(format!(
                    "invalid purchased quantity {}",
                    quantity
                )));
            }
            merged.quantity_purchased = Some(quantity);
        }
        if let Some(unit) = &input.purchased_measurement_unit {
            merged.purchased_measurement_unit = Some(unit.clone());
        }
        if let Some(upc) = &input.purchased_upc {
            merged.purchased_upc = Some(upc.clone());
        }
        if let Some(price) = input.purchase_price {
            merged.purchase_price = Some(price);
        }

        if merged.has_purchase_details() && merged.status != GroceryListItemStatus::Acquired {
            return Err(Error::InvalidInput(format!(
                "grocery list item {} has purchase details but status {}",
                self.id,
                merged.status.as_str()
            )));
        }

        *self = merged;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealPlanGroceryListItemDatabaseCreationInput {
    pub id: String,
    pub belongs_to_meal_plan: String,
    pub valid_ingredient: String,
    pub valid_measurement_unit: String,
    pub minimum_quantity_needed: f64,
    pub maximum_quantity_needed: Option<f64>,
    pub status: GroceryListItemStatus,
    pub status_explanation: String,
}

/// Patch record: `None` leaves the field untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MealPlanGroceryListItemUpdateRequestInput {
    pub status: Option<GroceryListItemStatus>,
    pub status_explanation: Option<String>,
    pub quantity_purchased: Option<f64>,
    pub purchased_measurement_unit: Option<String>,
    pub purchased_upc: Option<String>,
    pub purchase_price: Option<f64>,
}

// ========================================
// Recipes and catalog (read-only)
// ========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    pub id: String,
    pub name: String,
    pub components: Vec<MealComponent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealComponent {
    pub recipe_scale: f64,
    pub recipe: Recipe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub name: String,
    pub steps: Vec<RecipeStep>,
    pub prep_tasks: Vec<RecipePrepTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeStep {
    pub id: String,
    pub index: u32,
    pub ingredients: Vec<RecipeStepIngredient>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeStepIngredient {
    pub id: String,
    pub name: String,
    /// None when the ingredient is the product of an earlier step
    pub ingredient_id: Option<String>,
    pub measurement_unit_id: String,
    pub minimum_quantity: f64,
    pub maximum_quantity: Option<f64>,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipePrepTask {
    pub id: String,
    pub name: String,
    pub description: String,
    pub notes: String,
    pub storage_type: Option<String>,
    pub explicit_storage_instructions: String,
    pub minimum_time_buffer_seconds: u32,
    pub maximum_time_buffer_seconds: Option<u32>,
    pub minimum_storage_temperature_in_celsius: Option<f64>,
    pub maximum_storage_temperature_in_celsius: Option<f64>,
    pub belongs_to_recipe: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementUnitConversion {
    pub id: String,
    pub from_unit: String,
    pub to_unit: String,
    /// Restricts the conversion to one ingredient (e.g. cups of flour to grams)
    pub only_for_ingredient: Option<String>,
    /// Quantity in `to_unit` = quantity in `from_unit` * modifier
    pub modifier: f64,
    pub notes: String,
}

impl MeasurementUnitConversion {
    pub fn applies_to(&self, ingredient_id: &str) -> bool {
        self.only_for_ingredient
            .as_deref()
            .map_or(true, |only| only == ingredient_id)
    }
}
