//! Read-only recipe tree: meals, components, recipes, steps, ingredients, prep tasks

use std::collections::HashMap;

use mealplan_common::db::{
    Meal, MealComponent, MealPlan, Recipe, RecipePrepTask, RecipeStep, RecipeStepIngredient,
};
use mealplan_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{get_bool, get_opt_u32, get_u32, Store};

/// Meals already loaded during one scan
#[derive(Default)]
pub(crate) struct MealCache {
    meals: HashMap<String, Meal>,
}

impl MealCache {
    async fn get_or_load(&mut self, conn: &mut SqliteConnection, meal_id: &str) -> Result<Meal> {
        if let Some(meal) = self.meals.get(meal_id) {
            return Ok(meal.clone());
        }
        let meal = load_meal(conn, meal_id).await?;
        self.meals.insert(meal_id.to_string(), meal.clone());
        Ok(meal)
    }
}

impl Store {
    pub async fn get_meal(&self, meal_id: &str) -> Result<Meal> {
        let mut conn = self.pool.acquire().await?;
        load_meal(&mut conn, meal_id).await
    }

    pub async fn get_recipe(&self, recipe_id: &str) -> Result<Recipe> {
        let mut conn = self.pool.acquire().await?;
        load_recipe(&mut conn, recipe_id).await
    }
}

/// Populate `option.meal` on every option of `plan`
pub(crate) async fn attach_meals(
    conn: &mut SqliteConnection,
    plan: &mut MealPlan,
    cache: &mut MealCache,
) -> Result<()> {
    for event in plan.events.iter_mut() {
        for option in event.options.iter_mut() {
            let meal = cache.get_or_load(conn, &option.meal_id).await?;
            option.meal = Some(meal);
        }
    }
    Ok(())
}

async fn load_meal(conn: &mut SqliteConnection, meal_id: &str) -> Result<Meal> {
    let row = sqlx::query("SELECT id, name FROM meals WHERE id = ? AND archived_at IS NULL")
        .bind(meal_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("meal {}", meal_id)))?;

    let component_rows = sqlx::query(
        r#"
        SELECT recipe_id, recipe_scale FROM meal_components
        WHERE meal_id = ? AND archived_at IS NULL
        ORDER BY id
        "#,
    )
    .bind(meal_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut components = Vec::with_capacity(component_rows.len());
    for component in &component_rows {
        let recipe_id: String = component.try_get("recipe_id")?;
        components.push(MealComponent {
            recipe_scale: component.try_get("recipe_scale")?,
            recipe: load_recipe(conn, &recipe_id).await?,
        });
    }

    Ok(Meal {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        components,
    })
}

async fn load_recipe(conn: &mut SqliteConnection, recipe_id: &str) -> Result<Recipe> {
    let row = sqlx::query("SELECT id, name FROM recipes WHERE id = ? AND archived_at IS NULL")
        .bind(recipe_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("recipe {}", recipe_id)))?;

    let step_rows = sqlx::query(
        r#"
        SELECT id, step_index FROM recipe_steps
        WHERE belongs_to_recipe = ? AND archived_at IS NULL
        ORDER BY step_index, id
        "#,
    )
    .bind(recipe_id)
    .fetch_all(&mut *conn)
    .await?;

    let ingredient_rows = sqlx::query(
        r#"
        SELECT i.* FROM recipe_step_ingredients i
        JOIN recipe_steps s ON s.id = i.belongs_to_recipe_step
        WHERE s.belongs_to_recipe = ?
          AND i.archived_at IS NULL AND s.archived_at IS NULL
        ORDER BY i.id
        "#,
    )
    .bind(recipe_id)
    .fetch_all(&mut *conn)
    .await?;

    let prep_task_rows = sqlx::query(
        r#"
        SELECT * FROM recipe_prep_tasks
        WHERE belongs_to_recipe = ? AND archived_at IS NULL
        ORDER BY id
        "#,
    )
    .bind(recipe_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut ingredients_by_step: HashMap<String, Vec<RecipeStepIngredient>> = HashMap::new();
    for row in &ingredient_rows {
        let step_id: String = row.try_get("belongs_to_recipe_step")?;
        ingredients_by_step
            .entry(step_id)
            .or_default()
            .push(ingredient_from_row(row)?);
    }

    let mut steps = Vec::with_capacity(step_rows.len());
    for row in &step_rows {
        let id: String = row.try_get("id")?;
        steps.push(RecipeStep {
            index: get_u32(row, "step_index")?,
            ingredients: ingredients_by_step.remove(&id).unwrap_or_default(),
            id,
        });
    }

    let prep_tasks = prep_task_rows
        .iter()
        .map(prep_task_from_row)
        .collect::<Result<Vec<_>>>()?;

    Ok(Recipe {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        steps,
        prep_tasks,
    })
}

fn ingredient_from_row(row: &SqliteRow) -> Result<RecipeStepIngredient> {
    Ok(RecipeStepIngredient {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        ingredient_id: row.try_get("ingredient_id")?,
        measurement_unit_id: row.try_get("measurement_unit")?,
        minimum_quantity: row.try_get("minimum_quantity_value")?,
        maximum_quantity: row.try_get("maximum_quantity_value")?,
        optional: get_bool(row, "optional")?,
    })
}

fn prep_task_from_row(row: &SqliteRow) -> Result<RecipePrepTask> {
    Ok(RecipePrepTask {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        notes: row.try_get("notes")?,
        storage_type: row.try_get("storage_type")?,
        explicit_storage_instructions: row.try_get("explicit_storage_instructions")?,
        minimum_time_buffer_seconds: get_u32(row, "minimum_time_buffer_before_recipe_in_seconds")?,
        maximum_time_buffer_seconds: get_opt_u32(row, "maximum_time_buffer_before_recipe_in_seconds")?,
        minimum_storage_temperature_in_celsius: row.try_get("minimum_storage_temperature_in_celsius")?,
        maximum_storage_temperature_in_celsius: row.try_get("maximum_storage_temperature_in_celsius")?,
        belongs_to_recipe: row.try_get("belongs_to_recipe")?,
    })
}
