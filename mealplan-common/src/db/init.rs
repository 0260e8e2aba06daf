//! Database initialization
//!
//! Opens the connection pool and creates the schema if needed. All
//! statements are idempotent, so this runs on every start.

use crate::config::DatabaseConfig;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Open the pool described by `config` and create tables [idempotent]
pub async fn init_database(config: &DatabaseConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_open_connections)
        .min_connections(config.max_idle_connections)
        .connect_with(options)
        .await?;

    info!(
        max_open = config.max_open_connections,
        max_idle = config.max_idle_connections,
        "Opened database: {}",
        config.url
    );

    create_schema(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database with the full schema
///
/// Each in-memory connection is its own database, so the pool is capped at one.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Create every table and index used by the lifecycle services
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Read-only catalog
    create_valid_ingredients_table(pool).await?;
    create_valid_measurement_units_table(pool).await?;
    create_valid_measurement_unit_conversions_table(pool).await?;

    // Recipes (read-only for the lifecycle core)
    create_recipes_table(pool).await?;
    create_recipe_steps_table(pool).await?;
    create_recipe_step_ingredients_table(pool).await?;
    create_recipe_prep_tasks_table(pool).await?;
    create_meals_table(pool).await?;
    create_meal_components_table(pool).await?;

    // Meal plans
    create_meal_plans_table(pool).await?;
    create_meal_plan_events_table(pool).await?;
    create_meal_plan_options_table(pool).await?;
    create_meal_plan_option_votes_table(pool).await?;
    create_meal_plan_tasks_table(pool).await?;
    create_meal_plan_grocery_list_items_table(pool).await?;

    Ok(())
}

async fn create_valid_ingredients_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS valid_ingredients (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_updated_at INTEGER,
            archived_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_valid_measurement_units_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS valid_measurement_units (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            metric INTEGER NOT NULL DEFAULT 0,
            imperial INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            last_updated_at INTEGER,
            archived_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_valid_measurement_unit_conversions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS valid_measurement_unit_conversions (
            id TEXT PRIMARY KEY,
            from_unit TEXT NOT NULL REFERENCES valid_measurement_units(id),
            to_unit TEXT NOT NULL REFERENCES valid_measurement_units(id),
            only_for_ingredient TEXT REFERENCES valid_ingredients(id),
            modifier REAL NOT NULL CHECK (modifier > 0),
            notes TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            last_updated_at INTEGER,
            archived_at INTEGER,
            CHECK (from_unit <> to_unit)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_unit_conversions_from ON valid_measurement_unit_conversions(from_unit)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_recipes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recipes (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_updated_at INTEGER,
            archived_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_recipe_steps_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recipe_steps (
            id TEXT PRIMARY KEY,
            step_index INTEGER NOT NULL,
            belongs_to_recipe TEXT NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
            created_at INTEGER NOT NULL,
            last_updated_at INTEGER,
            archived_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_recipe_step_ingredients_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recipe_step_ingredients (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            ingredient_id TEXT REFERENCES valid_ingredients(id),
            measurement_unit TEXT NOT NULL REFERENCES valid_measurement_units(id),
            minimum_quantity_value REAL NOT NULL,
            maximum_quantity_value REAL,
            optional INTEGER NOT NULL DEFAULT 0,
            belongs_to_recipe_step TEXT NOT NULL REFERENCES recipe_steps(id) ON DELETE CASCADE,
            created_at INTEGER NOT NULL,
            last_updated_at INTEGER,
            archived_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_recipe_prep_tasks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recipe_prep_tasks (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            notes TEXT NOT NULL DEFAULT '',
            storage_type TEXT,
            explicit_storage_instructions TEXT NOT NULL DEFAULT '',
            minimum_time_buffer_before_recipe_in_seconds INTEGER NOT NULL DEFAULT 0,
            maximum_time_buffer_before_recipe_in_seconds INTEGER,
            minimum_storage_temperature_in_celsius REAL,
            maximum_storage_temperature_in_celsius REAL,
            belongs_to_recipe TEXT NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
            created_at INTEGER NOT NULL,
            last_updated_at INTEGER,
            archived_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_meals_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meals (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_updated_at INTEGER,
            archived_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_meal_components_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meal_components (
            id TEXT PRIMARY KEY,
            meal_id TEXT NOT NULL REFERENCES meals(id) ON DELETE CASCADE,
            recipe_id TEXT NOT NULL REFERENCES recipes(id),
            recipe_scale REAL NOT NULL DEFAULT 1.0 CHECK (recipe_scale > 0),
            created_at INTEGER NOT NULL,
            last_updated_at INTEGER,
            archived_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_meal_plans_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meal_plans (
            id TEXT PRIMARY KEY,
            notes TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'awaiting_votes'
                CHECK (status IN ('awaiting_votes', 'finalized')),
            voting_deadline INTEGER NOT NULL,
            election_method TEXT NOT NULL DEFAULT 'schulze'
                CHECK (election_method IN ('schulze', 'instant_runoff')),
            grocery_list_initialized INTEGER NOT NULL DEFAULT 0,
            tasks_created INTEGER NOT NULL DEFAULT 0,
            belongs_to_household TEXT NOT NULL,
            created_by_user TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_updated_at INTEGER,
            archived_at INTEGER,
            CHECK (grocery_list_initialized = 0 OR status = 'finalized'),
            CHECK (tasks_created = 0 OR status = 'finalized')
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_meal_plans_status_deadline ON meal_plans(status, voting_deadline)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_meal_plan_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meal_plan_events (
            id TEXT PRIMARY KEY,
            notes TEXT NOT NULL DEFAULT '',
            starts_at INTEGER NOT NULL,
            ends_at INTEGER NOT NULL,
            meal_name TEXT NOT NULL,
            belongs_to_meal_plan TEXT NOT NULL REFERENCES meal_plans(id) ON DELETE CASCADE,
            created_at INTEGER NOT NULL,
            last_updated_at INTEGER,
            archived_at INTEGER,
            CHECK (ends_at > starts_at)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_meal_plan_options_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meal_plan_options (
            id TEXT PRIMARY KEY,
            meal_id TEXT NOT NULL,
            meal_scale REAL NOT NULL DEFAULT 1.0 CHECK (meal_scale > 0),
            chosen INTEGER NOT NULL DEFAULT 0,
            tiebroken INTEGER NOT NULL DEFAULT 0,
            assigned_cook TEXT,
            assigned_dishwasher TEXT,
            notes TEXT NOT NULL DEFAULT '',
            belongs_to_meal_plan_event TEXT NOT NULL REFERENCES meal_plan_events(id) ON DELETE CASCADE,
            created_at INTEGER NOT NULL,
            last_updated_at INTEGER,
            archived_at INTEGER,
            CHECK (tiebroken = 0 OR chosen = 1)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one chosen option per event
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_meal_plan_options_one_chosen
        ON meal_plan_options(belongs_to_meal_plan_event)
        WHERE chosen = 1 AND archived_at IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_meal_plan_option_votes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meal_plan_option_votes (
            id TEXT PRIMARY KEY,
            rank INTEGER NOT NULL CHECK (rank >= 0),
            abstain INTEGER NOT NULL DEFAULT 0,
            notes TEXT NOT NULL DEFAULT '',
            by_user TEXT NOT NULL,
            belongs_to_meal_plan_option TEXT NOT NULL REFERENCES meal_plan_options(id) ON DELETE CASCADE,
            created_at INTEGER NOT NULL,
            last_updated_at INTEGER,
            archived_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_meal_plan_option_votes_user_option
        ON meal_plan_option_votes(by_user, belongs_to_meal_plan_option)
        WHERE archived_at IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_meal_plan_tasks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meal_plan_tasks (
            id TEXT PRIMARY KEY,
            belongs_to_meal_plan TEXT NOT NULL REFERENCES meal_plans(id) ON DELETE CASCADE,
            belongs_to_meal_plan_option TEXT NOT NULL REFERENCES meal_plan_options(id),
            belongs_to_recipe_prep_task TEXT NOT NULL REFERENCES recipe_prep_tasks(id),
            status TEXT NOT NULL DEFAULT 'unfinished'
                CHECK (status IN ('unfinished', 'in_progress', 'ignored', 'postponed', 'finished')),
            creation_explanation TEXT NOT NULL DEFAULT '',
            status_explanation TEXT NOT NULL DEFAULT '',
            assigned_to_user TEXT,
            storage_type TEXT,
            explicit_storage_instructions TEXT NOT NULL DEFAULT '',
            minimum_time_buffer_before_recipe_in_seconds INTEGER NOT NULL DEFAULT 0,
            maximum_time_buffer_before_recipe_in_seconds INTEGER,
            cannot_complete_before INTEGER,
            cannot_complete_after INTEGER,
            completed_at INTEGER,
            created_at INTEGER NOT NULL,
            last_updated_at INTEGER,
            archived_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_meal_plan_tasks_option_prep_task
        ON meal_plan_tasks(belongs_to_meal_plan_option, belongs_to_recipe_prep_task)
        WHERE archived_at IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_meal_plan_grocery_list_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meal_plan_grocery_list_items (
            id TEXT PRIMARY KEY,
            belongs_to_meal_plan TEXT NOT NULL REFERENCES meal_plans(id) ON DELETE CASCADE,
            valid_ingredient TEXT NOT NULL,
            valid_measurement_unit TEXT NOT NULL,
            minimum_quantity_needed REAL NOT NULL,
            maximum_quantity_needed REAL,
            quantity_purchased REAL,
            purchased_measurement_unit TEXT,
            purchased_upc TEXT,
            purchase_price REAL,
            status_explanation TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'unknown'
                CHECK (status IN ('unknown', 'already_owned', 'needs', 'unavailable', 'acquired')),
            created_at INTEGER NOT NULL,
            last_updated_at INTEGER,
            archived_at INTEGER,
            CHECK (
                status = 'acquired'
                OR (quantity_purchased IS NULL AND purchased_measurement_unit IS NULL
                    AND purchased_upc IS NULL AND purchase_price IS NULL)
            )
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_grocery_items_plan_ingredient_unit
        ON meal_plan_grocery_list_items(belongs_to_meal_plan, valid_ingredient, valid_measurement_unit)
        WHERE archived_at IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
