//! Shared fixtures for lifecycle integration tests
//!
//! Builds a store, bus and the lifecycle services over an in-memory or
//! on-disk SQLite database, and seeds recipes, meals and plans with raw SQL.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use mealplan_common::config::DatabaseConfig;
use mealplan_common::db::{
    init_database, init_memory_database, ElectionMethod, MealName, MealPlan,
    MealPlanDatabaseCreationInput, MealPlanEventDatabaseCreationInput,
    MealPlanOptionDatabaseCreationInput, MealPlanOptionVoteCreationInput,
    MealPlanOptionVotesCreationInput, RetryPolicy,
};
use mealplan_common::events::{ChangeEventType, DataChangeMessage, EventBus};
use mealplan_lifecycle::workers::{Finalizer, GroceryListInitializer, TaskCreator};
use mealplan_lifecycle::{
    ConversionCatalog, FinalizationCoordinator, GroceryListBuilder, Store, TaskGenerator,
};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::sync::broadcast;

pub const HOUSEHOLD: &str = "household-1";
pub const OWNER: &str = "user-owner";

/// Store, bus and services wired the way the binary wires them
pub struct Harness {
    pub pool: SqlitePool,
    pub store: Store,
    pub bus: EventBus,
    pub events: broadcast::Receiver<DataChangeMessage>,
    pub coordinator: Arc<FinalizationCoordinator>,
    pub builder: Arc<GroceryListBuilder>,
    pub generator: Arc<TaskGenerator>,
    pub retry: RetryPolicy,
}

impl Harness {
    /// Single-connection in-memory database
    pub async fn in_memory() -> Self {
        Self::with_pool(init_memory_database().await.unwrap())
    }

    /// File database with several connections, for concurrency tests
    pub async fn on_disk(dir: &TempDir) -> Self {
        let config = DatabaseConfig {
            url: format!("sqlite://{}?mode=rwc", dir.path().join("mealplan.db").display()),
            max_open_connections: 4,
            max_idle_connections: 2,
            busy_timeout_ms: 5000,
        };
        Self::with_pool(init_database(&config).await.unwrap())
    }

    fn with_pool(pool: SqlitePool) -> Self {
        let store = Store::new(pool.clone());
        let bus = EventBus::new("data_changes", 1000);
        let events = bus.subscribe();
        let retry = RetryPolicy::with_max_attempts(5);

        let coordinator = Arc::new(FinalizationCoordinator::new(
            store.clone(),
            Arc::new(bus.clone()),
            retry,
        ));
        let builder = Arc::new(GroceryListBuilder::new(
            store.clone(),
            Arc::new(ConversionCatalog::new(store.clone())),
            Arc::new(bus.clone()),
            retry,
        ));
        let generator = Arc::new(TaskGenerator::new(store.clone(), Arc::new(bus.clone()), retry));

        Self {
            pool,
            store,
            bus,
            events,
            coordinator,
            builder,
            generator,
            retry,
        }
    }

    pub fn finalizer(&self) -> Finalizer {
        Finalizer::new(Arc::clone(&self.coordinator), self.retry)
    }

    pub fn grocery_list_initializer(&self) -> GroceryListInitializer {
        GroceryListInitializer::new(Arc::clone(&self.builder), self.retry)
    }

    pub fn task_creator(&self) -> TaskCreator {
        TaskCreator::new(Arc::clone(&self.generator), self.retry)
    }

    /// Every message published since the last drain
    pub fn drain_events(&mut self) -> Vec<DataChangeMessage> {
        let mut drained = Vec::new();
        while let Ok(message) = self.events.try_recv() {
            drained.push(message);
        }
        drained
    }

    pub async fn plan(&self, plan_id: &str) -> MealPlan {
        self.store.get_meal_plan(plan_id, HOUSEHOLD).await.unwrap()
    }
}

pub fn count_of(events: &[DataChangeMessage], event_type: ChangeEventType) -> usize {
    events.iter().filter(|m| m.event_type() == event_type).count()
}

// ========================================
// Catalog and recipe seeding
// ========================================

/// One recipe step ingredient
#[derive(Debug, Clone)]
pub struct IngredientFixture {
    pub ingredient: Option<&'static str>,
    pub unit: &'static str,
    pub min: f64,
    pub max: Option<f64>,
    pub optional: bool,
}

pub fn ingredient(ingredient: &'static str, unit: &'static str, min: f64) -> IngredientFixture {
    IngredientFixture {
        ingredient: Some(ingredient),
        unit,
        min,
        max: None,
        optional: false,
    }
}

/// One recipe prep task
#[derive(Debug, Clone)]
pub struct PrepTaskFixture {
    pub id: &'static str,
    pub name: &'static str,
    pub min_buffer_secs: u32,
    pub max_buffer_secs: Option<u32>,
}

pub fn prep_task(id: &'static str, min_buffer_secs: u32, max_buffer_secs: Option<u32>) -> PrepTaskFixture {
    PrepTaskFixture {
        id,
        name: id,
        min_buffer_secs,
        max_buffer_secs,
    }
}

pub async fn seed_unit(pool: &SqlitePool, unit_id: &str) {
    sqlx::query("INSERT OR IGNORE INTO valid_measurement_units (id, name, created_at) VALUES (?, ?, 0)")
        .bind(unit_id)
        .bind(unit_id)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn seed_ingredient(pool: &SqlitePool, ingredient_id: &str) {
    sqlx::query("INSERT OR IGNORE INTO valid_ingredients (id, name, created_at) VALUES (?, ?, 0)")
        .bind(ingredient_id)
        .bind(ingredient_id)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn seed_conversion(
    pool: &SqlitePool,
    id: &str,
    from_unit: &str,
    to_unit: &str,
    only_for_ingredient: Option<&str>,
    modifier: f64,
) {
    seed_unit(pool, from_unit).await;
    seed_unit(pool, to_unit).await;
    if let Some(ingredient_id) = only_for_ingredient {
        seed_ingredient(pool, ingredient_id).await;
    }

    sqlx::query(
        r#"
        INSERT INTO valid_measurement_unit_conversions
            (id, from_unit, to_unit, only_for_ingredient, modifier, created_at)
        VALUES (?, ?, ?, ?, ?, 0)
        "#,
    )
    .bind(id)
    .bind(from_unit)
    .bind(to_unit)
    .bind(only_for_ingredient)
    .bind(modifier)
    .execute(pool)
    .await
    .unwrap();
}

/// Recipe with a single step holding `ingredients`, plus `prep_tasks`
pub async fn seed_recipe(
    pool: &SqlitePool,
    recipe_id: &str,
    ingredients: &[IngredientFixture],
    prep_tasks: &[PrepTaskFixture],
) {
    sqlx::query("INSERT INTO recipes (id, name, created_at) VALUES (?, ?, 0)")
        .bind(recipe_id)
        .bind(recipe_id)
        .execute(pool)
        .await
        .unwrap();

    let step_id = format!("{}-step-0", recipe_id);
    sqlx::query("INSERT INTO recipe_steps (id, step_index, belongs_to_recipe, created_at) VALUES (?, 0, ?, 0)")
        .bind(&step_id)
        .bind(recipe_id)
        .execute(pool)
        .await
        .unwrap();

    for (index, fixture) in ingredients.iter().enumerate() {
        seed_unit(pool, fixture.unit).await;
        if let Some(ingredient_id) = fixture.ingredient {
            seed_ingredient(pool, ingredient_id).await;
        }

        sqlx::query(
            r#"
            INSERT INTO recipe_step_ingredients (
                id, name, ingredient_id, measurement_unit, minimum_quantity_value,
                maximum_quantity_value, optional, belongs_to_recipe_step, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(format!("{}-ingredient-{}", recipe_id, index))
        .bind(fixture.ingredient.unwrap_or("intermediate"))
        .bind(fixture.ingredient)
        .bind(fixture.unit)
        .bind(fixture.min)
        .bind(fixture.max)
        .bind(fixture.optional)
        .bind(&step_id)
        .execute(pool)
        .await
        .unwrap();
    }

    for fixture in prep_tasks {
        sqlx::query(
            r#"
            INSERT INTO recipe_prep_tasks (
                id, name, storage_type, minimum_time_buffer_before_recipe_in_seconds,
                maximum_time_buffer_before_recipe_in_seconds, belongs_to_recipe, created_at
            ) VALUES (?, ?, 'covered', ?, ?, ?, 0)
            "#,
        )
        .bind(fixture.id)
        .bind(fixture.name)
        .bind(i64::from(fixture.min_buffer_secs))
        .bind(fixture.max_buffer_secs.map(i64::from))
        .bind(recipe_id)
        .execute(pool)
        .await
        .unwrap();
    }
}

/// Meal made of `(recipe_id, recipe_scale)` components
pub async fn seed_meal(pool: &SqlitePool, meal_id: &str, components: &[(&str, f64)]) {
    sqlx::query("INSERT INTO meals (id, name, created_at) VALUES (?, ?, 0)")
        .bind(meal_id)
        .bind(meal_id)
        .execute(pool)
        .await
        .unwrap();

    for (index, (recipe_id, scale)) in components.iter().enumerate() {
        sqlx::query(
            "INSERT INTO meal_components (id, meal_id, recipe_id, recipe_scale, created_at) VALUES (?, ?, ?, ?, 0)",
        )
        .bind(format!("{}-component-{}", meal_id, index))
        .bind(meal_id)
        .bind(recipe_id)
        .bind(scale)
        .execute(pool)
        .await
        .unwrap();
    }
}

/// A meal with a plain recipe, for plans whose recipes do not matter
pub async fn seed_simple_meals(pool: &SqlitePool, meal_ids: &[&str]) {
    for meal_id in meal_ids {
        let recipe_id = format!("{}-recipe", meal_id);
        seed_recipe(pool, &recipe_id, &[ingredient("salt", "grams", 1.0)], &[]).await;
        seed_meal(pool, meal_id, &[(recipe_id.as_str(), 1.0)]).await;
    }
}

// ========================================
// Plans and ballots
// ========================================

/// An event with `(option_id, meal_id, meal_scale)` options
pub struct EventFixture {
    pub id: &'static str,
    pub options: Vec<(&'static str, &'static str, f64)>,
}

pub fn event(id: &'static str, options: &[(&'static str, &'static str, f64)]) -> EventFixture {
    EventFixture {
        id,
        options: options.to_vec(),
    }
}

/// Start of the first event; events follow one day apart
pub fn first_event_start() -> DateTime<Utc> {
    Utc::now() + Duration::days(2)
}

pub fn plan_input(
    plan_id: &str,
    voting_deadline: DateTime<Utc>,
    election_method: Option<ElectionMethod>,
    events: Vec<EventFixture>,
) -> MealPlanDatabaseCreationInput {
    let first_start = first_event_start();
    MealPlanDatabaseCreationInput {
        id: plan_id.to_string(),
        notes: String::new(),
        voting_deadline,
        election_method,
        belongs_to_household: HOUSEHOLD.to_string(),
        created_by_user: OWNER.to_string(),
        events: events
            .into_iter()
            .enumerate()
            .map(|(index, fixture)| {
                let starts_at = first_start + Duration::days(index as i64);
                MealPlanEventDatabaseCreationInput {
                    id: fixture.id.to_string(),
                    notes: String::new(),
                    starts_at,
                    ends_at: starts_at + Duration::hours(1),
                    meal_name: MealName::Dinner,
                    options: fixture
                        .options
                        .into_iter()
                        .map(|(id, meal_id, meal_scale)| MealPlanOptionDatabaseCreationInput {
                            id: id.to_string(),
                            meal_id: meal_id.to_string(),
                            meal_scale,
                            notes: String::new(),
                            assigned_cook: None,
                            assigned_dishwasher: None,
                        })
                        .collect(),
                }
            })
            .collect(),
    }
}

/// Create a plan whose voting deadline has just passed
///
/// The plan is created "yesterday" so the deadline was in the future at creation.
pub async fn create_expired_plan(
    harness: &Harness,
    plan_id: &str,
    election_method: Option<ElectionMethod>,
    events: Vec<EventFixture>,
) -> MealPlan {
    let deadline = Utc::now() - Duration::minutes(1);
    let input = plan_input(plan_id, deadline, election_method, events);
    harness
        .store
        .create_meal_plan(&input, ElectionMethod::Schulze, deadline - Duration::days(1))
        .await
        .unwrap()
}

/// Create a plan whose voting deadline is still a day away
pub async fn create_open_plan(
    harness: &Harness,
    plan_id: &str,
    election_method: Option<ElectionMethod>,
    events: Vec<EventFixture>,
) -> MealPlan {
    let deadline = Utc::now() + Duration::days(1);
    let input = plan_input(plan_id, deadline, election_method, events);
    harness
        .store
        .create_meal_plan(&input, ElectionMethod::Schulze, Utc::now())
        .await
        .unwrap()
}

/// A ballot ranking `options` in order, favorite first
pub fn ballot(voter: &str, options: &[&str]) -> MealPlanOptionVotesCreationInput {
    MealPlanOptionVotesCreationInput {
        by_user: voter.to_string(),
        votes: options
            .iter()
            .enumerate()
            .map(|(rank, option)| MealPlanOptionVoteCreationInput {
                id: format!("vote-{}-{}", voter, option),
                belongs_to_meal_plan_option: option.to_string(),
                rank: rank as u32,
                abstain: false,
                notes: String::new(),
            })
            .collect(),
    }
}

/// Cast `ballot` for `event_id`; votes are accepted until the plan is finalized
pub async fn cast(harness: &Harness, plan_id: &str, event_id: &str, ballot: MealPlanOptionVotesCreationInput) {
    harness
        .store
        .create_meal_plan_option_votes(plan_id, HOUSEHOLD, event_id, &ballot, Utc::now())
        .await
        .unwrap();
}
