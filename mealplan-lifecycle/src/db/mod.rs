//! Data manager for the meal-plan lifecycle
//!
//! [`Store`] wraps the SQLite pool. Methods are grouped by use case across
//! the submodules (meal-plan writes, votes, recipe and catalog reads,
//! grocery writes, task writes). Every mutation runs in one transaction;
//! dropping an uncommitted transaction rolls it back.

mod conversions;
mod grocery_list_items;
mod meal_plans;
mod recipes;
mod tasks;
mod votes;

pub use grocery_list_items::GroceryListInitialization;
pub use meal_plans::{FinalizationOutcome, FinalizeRequest};

use mealplan_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// Relational store for meal plans, votes, tasks and grocery lists
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ========================================
// Row decoding helpers
// ========================================

pub(crate) fn get_u32(row: &SqliteRow, column: &str) -> Result<u32> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value)
        .map_err(|_| Error::Internal(format!("column {} holds out-of-range value {}", column, value)))
}

pub(crate) fn get_opt_u32(row: &SqliteRow, column: &str) -> Result<Option<u32>> {
    let value: Option<i64> = row.try_get(column)?;
    value
        .map(|v| {
            u32::try_from(v).map_err(|_| {
                Error::Internal(format!("column {} holds out-of-range value {}", column, v))
            })
        })
        .transpose()
}

pub(crate) fn get_bool(row: &SqliteRow, column: &str) -> Result<bool> {
    let value: i64 = row.try_get(column)?;
    Ok(value != 0)
}

pub(crate) fn get_instant(row: &SqliteRow, column: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    let millis: i64 = row.try_get(column)?;
    Ok(mealplan_common::time::from_millis(millis))
}

pub(crate) fn get_opt_instant(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    let millis: Option<i64> = row.try_get(column)?;
    Ok(mealplan_common::time::from_millis_opt(millis))
}

/// Parse a stored enum column with its `from_str`
pub(crate) fn get_enum<T>(
    row: &SqliteRow,
    column: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T> {
    let raw: String = row.try_get(column)?;
    parse(&raw).ok_or_else(|| Error::Internal(format!("column {} holds unknown value '{}'", column, raw)))
}
