//! Integration tests for database initialization and schema constraints

use mealplan_common::config::DatabaseConfig;
use mealplan_common::db::{create_schema, init_database, init_memory_database};
use sqlx::SqlitePool;
use tempfile::TempDir;

fn file_config(dir: &TempDir) -> DatabaseConfig {
    DatabaseConfig {
        url: format!("sqlite://{}?mode=rwc", dir.path().join("mealplan.db").display()),
        max_open_connections: 4,
        max_idle_connections: 1,
        busy_timeout_ms: 1000,
    }
}

async fn insert_plan(pool: &SqlitePool, id: &str) {
    sqlx::query(
        "INSERT INTO meal_plans (id, voting_deadline, belongs_to_household, created_by_user, created_at)
         VALUES (?, 0, 'household-1', 'user-1', 0)",
    )
    .bind(id)
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn test_init_creates_database_file_and_tables() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&file_config(&dir)).await.unwrap();

    assert!(dir.path().join("mealplan.db").exists());

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(&pool)
            .await
            .unwrap();

    for expected in [
        "meal_components",
        "meal_plan_events",
        "meal_plan_grocery_list_items",
        "meal_plan_option_votes",
        "meal_plan_options",
        "meal_plan_tasks",
        "meal_plans",
        "meals",
        "recipe_prep_tasks",
        "recipe_step_ingredients",
        "recipe_steps",
        "recipes",
        "valid_ingredients",
        "valid_measurement_unit_conversions",
        "valid_measurement_units",
    ] {
        assert!(tables.iter().any(|t| t == expected), "missing table {}", expected);
    }
}

#[tokio::test]
async fn test_schema_creation_is_idempotent() {
    let pool = init_memory_database().await.unwrap();
    create_schema(&pool).await.unwrap();
    create_schema(&pool).await.unwrap();
}

#[tokio::test]
async fn test_flags_require_finalized_status() {
    let pool = init_memory_database().await.unwrap();
    insert_plan(&pool, "plan-1").await;

    let result = sqlx::query("UPDATE meal_plans SET grocery_list_initialized = 1 WHERE id = 'plan-1'")
        .execute(&pool)
        .await;
    assert!(result.is_err(), "grocery flag must not be settable before finalization");

    sqlx::query("UPDATE meal_plans SET status = 'finalized', tasks_created = 1 WHERE id = 'plan-1'")
        .execute(&pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_only_one_chosen_option_per_event() {
    let pool = init_memory_database().await.unwrap();
    insert_plan(&pool, "plan-1").await;
    sqlx::query(
        "INSERT INTO meal_plan_events (id, starts_at, ends_at, meal_name, belongs_to_meal_plan, created_at)
         VALUES ('event-1', 100, 200, 'dinner', 'plan-1', 0)",
    )
    .execute(&pool)
    .await
    .unwrap();

    for option in ["option-a", "option-b"] {
        sqlx::query(
            "INSERT INTO meal_plan_options (id, meal_id, belongs_to_meal_plan_event, created_at)
             VALUES (?, 'meal-1', 'event-1', 0)",
        )
        .bind(option)
        .execute(&pool)
        .await
        .unwrap();
    }

    sqlx::query("UPDATE meal_plan_options SET chosen = 1 WHERE id = 'option-a'")
        .execute(&pool)
        .await
        .unwrap();
    let second = sqlx::query("UPDATE meal_plan_options SET chosen = 1 WHERE id = 'option-b'")
        .execute(&pool)
        .await;
    assert!(second.is_err());

    // tie_broken implies chosen
    let tie_without_choice =
        sqlx::query("UPDATE meal_plan_options SET tiebroken = 1 WHERE id = 'option-b'")
            .execute(&pool)
            .await;
    assert!(tie_without_choice.is_err());
}

#[tokio::test]
async fn test_purchase_details_require_acquired_status() {
    let pool = init_memory_database().await.unwrap();
    insert_plan(&pool, "plan-1").await;

    let insert = |status: &'static str| {
        let pool = pool.clone();
        async move {
            sqlx::query(
                "INSERT INTO meal_plan_grocery_list_items
                 (id, belongs_to_meal_plan, valid_ingredient, valid_measurement_unit,
                  minimum_quantity_needed, quantity_purchased, status, created_at)
                 VALUES (?, 'plan-1', 'onion', 'grams', 100, 120, ?, 0)",
            )
            .bind(format!("item-{}", status))
            .bind(status)
            .execute(&pool)
            .await
        }
    };

    assert!(insert("needs").await.is_err());
    assert!(insert("acquired").await.is_ok());
}
