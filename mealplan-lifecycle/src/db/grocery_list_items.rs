//! Grocery list item persistence

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mealplan_common::db::{
    GroceryListItemStatus, MealPlanGroceryListItem, MealPlanGroceryListItemDatabaseCreationInput,
    MealPlanGroceryListItemUpdateRequestInput,
};
use mealplan_common::time::{from_millis, to_millis};
use mealplan_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::{debug, info};

use super::meal_plans::{claim_flag, PlanFlag};
use super::{get_enum, get_instant, get_opt_instant, Store};

/// Rows written by one grocery list initialization
#[derive(Debug, Clone, Default)]
pub struct GroceryListInitialization {
    pub created: Vec<MealPlanGroceryListItem>,
    /// Items that already existed and absorbed a computed line
    pub merged: Vec<MealPlanGroceryListItem>,
}

impl GroceryListInitialization {
    pub fn len(&self) -> usize {
        self.created.len() + self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store {
    /// Insert a single grocery list item
    pub async fn create_meal_plan_grocery_list_item(
        &self,
        input: &MealPlanGroceryListItemDatabaseCreationInput,
        now: DateTime<Utc>,
    ) -> Result<MealPlanGroceryListItem> {
        let mut tx = self.pool.begin().await?;
        let item = insert_item(&mut tx, input, now).await?;
        tx.commit().await?;
        Ok(item)
    }

    /// Insert a plan's whole grocery list and set grocery_list_initialized in one transaction
    ///
    /// A line whose (ingredient, unit) already has a live item is added onto
    /// that item instead of inserted. Returns `None` without writing anything
    /// when the flag is already set (another builder won) or the plan is not
    /// finalized.
    pub async fn create_meal_plan_grocery_list_items_for_meal_plan(
        &self,
        plan_id: &str,
        inputs: &[MealPlanGroceryListItemDatabaseCreationInput],
        now: DateTime<Utc>,
    ) -> Result<Option<GroceryListInitialization>> {
        let mut tx = self.pool.begin().await?;

        if !claim_flag(&mut tx, plan_id, PlanFlag::GroceryListInitialized, now).await? {
            debug!(meal_plan_id = %plan_id, "Grocery list already initialized, skipping");
            return Ok(None);
        }

        let existing_rows = sqlx::query(
            r#"
            SELECT * FROM meal_plan_grocery_list_items
            WHERE belongs_to_meal_plan = ? AND archived_at IS NULL
            "#,
        )
        .bind(plan_id)
        .fetch_all(&mut *tx)
        .await?;
        let mut existing: HashMap<(String, String), MealPlanGroceryListItem> = HashMap::new();
        for row in &existing_rows {
            let item = item_from_row(row)?;
            existing.insert(
                (item.valid_ingredient.clone(), item.valid_measurement_unit.clone()),
                item,
            );
        }

        let mut outcome = GroceryListInitialization::default();
        for input in inputs {
            if input.belongs_to_meal_plan != plan_id {
                return Err(Error::InvalidInput(format!(
                    "grocery list item {} belongs to plan {}, not {}",
                    input.id, input.belongs_to_meal_plan, plan_id
                )));
            }

            let key = (input.valid_ingredient.clone(), input.valid_measurement_unit.clone());
            match existing.remove(&key) {
                Some(item) => outcome.merged.push(merge_into_item(&mut tx, item, input, now).await?),
                None => outcome.created.push(insert_item(&mut tx, input, now).await?),
            }
        }

        tx.commit().await?;

        info!(
            meal_plan_id = %plan_id,
            created_count = outcome.created.len(),
            merged_count = outcome.merged.len(),
            "Initialized grocery list"
        );
        Ok(Some(outcome))
    }

    pub async fn get_meal_plan_grocery_list_items_for_meal_plan(
        &self,
        plan_id: &str,
    ) -> Result<Vec<MealPlanGroceryListItem>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM meal_plan_grocery_list_items
            WHERE belongs_to_meal_plan = ? AND archived_at IS NULL
            ORDER BY valid_ingredient, valid_measurement_unit, id
            "#,
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    pub async fn get_meal_plan_grocery_list_item(
        &self,
        plan_id: &str,
        item_id: &str,
    ) -> Result<MealPlanGroceryListItem> {
        let mut conn = self.pool.acquire().await?;
        load_item(&mut conn, plan_id, item_id).await
    }

    /// Apply a patch to one item of a household's plan
    pub async fn update_meal_plan_grocery_list_item(
        &self,
        plan_id: &str,
        household_id: &str,
        item_id: &str,
        patch: &MealPlanGroceryListItemUpdateRequestInput,
        now: DateTime<Utc>,
    ) -> Result<MealPlanGroceryListItem> {
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query(
            r#"
            UPDATE meal_plan_grocery_list_items SET id = id
            WHERE id = ? AND belongs_to_meal_plan = ? AND archived_at IS NULL
              AND belongs_to_meal_plan IN (
                  SELECT id FROM meal_plans WHERE belongs_to_household = ? AND archived_at IS NULL
              )
            "#,
        )
        .bind(item_id)
        .bind(plan_id)
        .bind(household_id)
        .execute(&mut *tx)
        .await?;
        if locked.rows_affected() == 0 {
            return Err(Error::NotFound(format!("grocery list item {}", item_id)));
        }

        let mut item = load_item(&mut tx, plan_id, item_id).await?;
        item.update(patch)?;
        item.last_updated_at = Some(from_millis(to_millis(now)));

        sqlx::query(
            r#"
            UPDATE meal_plan_grocery_list_items
            SET status = ?, status_explanation = ?, quantity_purchased = ?,
                purchased_measurement_unit = ?, purchased_upc = ?, purchase_price = ?,
                last_updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(item.status.as_str())
        .bind(&item.status_explanation)
        .bind(item.quantity_purchased)
        .bind(&item.purchased_measurement_unit)
        .bind(&item.purchased_upc)
        .bind(item.purchase_price)
        .bind(to_millis(now))
        .bind(item_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            meal_plan_id = %plan_id,
            item_id = %item_id,
            status = item.status.as_str(),
            "Updated grocery list item"
        );
        Ok(item)
    }
}

/// Add a computed line's quantities onto an item that already holds its (ingredient, unit)
async fn merge_into_item(
    conn: &mut SqliteConnection,
    mut item: MealPlanGroceryListItem,
    input: &MealPlanGroceryListItemDatabaseCreationInput,
    now: DateTime<Utc>,
) -> Result<MealPlanGroceryListItem> {
    if !(input.minimum_quantity_needed.is_finite() && input.minimum_quantity_needed >= 0.0) {
        return Err(Error::InvalidInput(format!(
            "grocery list item {} has invalid quantity {}",
            input.id, input.minimum_quantity_needed
        )));
    }

    let maximum = match (item.maximum_quantity_needed, input.maximum_quantity_needed) {
        (None, None) => None,
        (existing, computed) => Some(
            existing.unwrap_or(item.minimum_quantity_needed)
                + computed.unwrap_or(input.minimum_quantity_needed),
        ),
    };
    item.minimum_quantity_needed += input.minimum_quantity_needed;
    item.maximum_quantity_needed = maximum;
    item.last_updated_at = Some(from_millis(to_millis(now)));

    sqlx::query(
        r#"
        UPDATE meal_plan_grocery_list_items
        SET minimum_quantity_needed = ?, maximum_quantity_needed = ?, last_updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(item.minimum_quantity_needed)
    .bind(item.maximum_quantity_needed)
    .bind(to_millis(now))
    .bind(&item.id)
    .execute(&mut *conn)
    .await?;

    debug!(
        meal_plan_id = %item.belongs_to_meal_plan,
        item_id = %item.id,
        ingredient = %item.valid_ingredient,
        "Merged computed quantity into existing grocery list item"
    );
    Ok(item)
}

async fn insert_item(
    conn: &mut SqliteConnection,
    input: &MealPlanGroceryListItemDatabaseCreationInput,
    now: DateTime<Utc>,
) -> Result<MealPlanGroceryListItem> {
    if !(input.minimum_quantity_needed.is_finite() && input.minimum_quantity_needed >= 0.0) {
        return Err(Error::InvalidInput(format!(
            "grocery list item {} has invalid quantity {}",
            input.id, input.minimum_quantity_needed
        )));
    }

    sqlx::query(
        r#"
        INSERT INTO meal_plan_grocery_list_items (
            id, belongs_to_meal_plan, valid_ingredient, valid_measurement_unit,
            minimum_quantity_needed, maximum_quantity_needed, status, status_explanation, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&input.id)
    .bind(&input.belongs_to_meal_plan)
    .bind(&input.valid_ingredient)
    .bind(&input.valid_measurement_unit)
    .bind(input.minimum_quantity_needed)
    .bind(input.maximum_quantity_needed)
    .bind(input.status.as_str())
    .bind(&input.status_explanation)
    .bind(to_millis(now))
    .execute(&mut *conn)
    .await?;

    Ok(MealPlanGroceryListItem {
        id: input.id.clone(),
        belongs_to_meal_plan: input.belongs_to_meal_plan.clone(),
        valid_ingredient: input.valid_ingredient.clone(),
        valid_measurement_unit: input.valid_measurement_unit.clone(),
        minimum_quantity_needed: input.minimum_quantity_needed,
        maximum_quantity_needed: input.maximum_quantity_needed,
        quantity_purchased: None,
        purchased_measurement_unit: None,
        purchased_upc: None,
        purchase_price: None,
        status_explanation: input.status_explanation.clone(),
        status: input.status,
        created_at: from_millis(to_millis(now)),
        last_updated_at: None,
        archived_at: None,
    })
}

async fn load_item(
    conn: &mut SqliteConnection,
    plan_id: &str,
    item_id: &str,
) -> Result<MealPlanGroceryListItem> {
    let row = sqlx::query(
        r#"
        SELECT * FROM meal_plan_grocery_list_items
        WHERE id = ? AND belongs_to_meal_plan = ? AND archived_at IS NULL
        "#,
    )
    .bind(item_id)
    .bind(plan_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| Error::NotFound(format!("grocery list item {}", item_id)))?;

    item_from_row(&row)
}

fn item_from_row(row: &SqliteRow) -> Result<MealPlanGroceryListItem> {
    Ok(MealPlanGroceryListItem {
        id: row.try_get("id")?,
        belongs_to_meal_plan: row.try_get("belongs_to_meal_plan")?,
        valid_ingredient: row.try_get("valid_ingredient")?,
        valid_measurement_unit: row.try_get("valid_measurement_unit")?,
        minimum_quantity_needed: row.try_get("minimum_quantity_needed")?,
        maximum_quantity_needed: row.try_get("maximum_quantity_needed")?,
        quantity_purchased: row.try_get("quantity_purchased")?,
        purchased_measurement_unit: row.try_get("purchased_measurement_unit")?,
        purchased_upc: row.try_get("purchased_upc")?,
        purchase_price: row.try_get("purchase_price")?,
        status_explanation: row.try_get("status_explanation")?,
        status: get_enum(row, "status", GroceryListItemStatus::from_str)?,
        created_at: get_instant(row, "created_at")?,
        last_updated_at: get_opt_instant(row, "last_updated_at")?,
        archived_at: get_opt_instant(row, "archived_at")?,
    })
}
