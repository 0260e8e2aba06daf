//! Meal plan task persistence and status changes

use chrono::{DateTime, Utc};
use mealplan_common::db::{
    MealPlanTask, MealPlanTaskDatabaseCreationInput, MealPlanTaskStatus,
    MealPlanTaskStatusChangeRequestInput,
};
use mealplan_common::time::{from_millis, to_millis};
use mealplan_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::{debug, info};

use super::meal_plans::{claim_flag, PlanFlag};
use super::{get_enum, get_instant, get_opt_instant, get_opt_u32, get_u32, Store};

impl Store {
    /// Insert a plan's generated tasks and set tasks_created in one transaction
    ///
    /// Returns `None` without writing anything when the flag is already set
    /// or the plan is not finalized.
    pub async fn create_meal_plan_tasks_for_meal_plan(
        &self,
        plan_id: &str,
        inputs: &[MealPlanTaskDatabaseCreationInput],
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<MealPlanTask>>> {
        let mut tx = self.pool.begin().await?;

        if !claim_flag(&mut tx, plan_id, PlanFlag::TasksCreated, now).await? {
            debug!(meal_plan_id = %plan_id, "Tasks already created, skipping");
            return Ok(None);
        }

        let mut tasks = Vec::with_capacity(inputs.len());
        for input in inputs {
            tasks.push(insert_task(&mut tx, plan_id, input, now).await?);
        }

        tx.commit().await?;

        info!(meal_plan_id = %plan_id, task_count = tasks.len(), "Created meal plan tasks");
        Ok(Some(tasks))
    }

    pub async fn get_meal_plan_tasks_for_meal_plan(&self, plan_id: &str) -> Result<Vec<MealPlanTask>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM meal_plan_tasks
            WHERE belongs_to_meal_plan = ? AND archived_at IS NULL
            ORDER BY cannot_complete_after, id
            "#,
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    pub async fn get_meal_plan_task(&self, plan_id: &str, task_id: &str) -> Result<MealPlanTask> {
        let mut conn = self.pool.acquire().await?;
        load_task(&mut conn, plan_id, task_id).await
    }

    /// Move a task to a new status following the task state machine
    ///
    /// Returns the updated task and the status it left.
    pub async fn change_meal_plan_task_status(
        &self,
        household_id: &str,
        input: &MealPlanTaskStatusChangeRequestInput,
        now: DateTime<Utc>,
    ) -> Result<(MealPlanTask, MealPlanTaskStatus)> {
        let now_millis = to_millis(now);
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query(
            r#"
            UPDATE meal_plan_tasks SET id = id
            WHERE id = ? AND belongs_to_meal_plan = ? AND archived_at IS NULL
              AND belongs_to_meal_plan IN (
                  SELECT id FROM meal_plans WHERE belongs_to_household = ? AND archived_at IS NULL
              )
            "#,
        )
        .bind(&input.id)
        .bind(&input.belongs_to_meal_plan)
        .bind(household_id)
        .execute(&mut *tx)
        .await?;
        if locked.rows_affected() == 0 {
            return Err(Error::NotFound(format!("meal plan task {}", input.id)));
        }

        let mut task = load_task(&mut tx, &input.belongs_to_meal_plan, &input.id).await?;
        let previous = task.status;

        if !previous.can_transition_to(input.status) {
            return Err(Error::Conflict(format!(
                "meal plan task {} cannot move from {} to {}",
                task.id, previous, input.status
            )));
        }

        task.status = input.status;
        if let Some(explanation) = &input.status_explanation {
            task.status_explanation = explanation.clone();
        }
        if let Some(user) = &input.assigned_to_user {
            task.assigned_to_user = Some(user.clone());
        }
        if input.status == MealPlanTaskStatus::Finished {
            task.completed_at = Some(from_millis(now_millis));
        }
        task.last_updated_at = Some(from_millis(now_millis));

        sqlx::query(
            r#"
            UPDATE meal_plan_tasks
            SET status = ?, status_explanation = ?, assigned_to_user = ?,
                completed_at = ?, last_updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(task.status.as_str())
        .bind(&task.status_explanation)
        .bind(&task.assigned_to_user)
        .bind(task.completed_at.map(to_millis))
        .bind(now_millis)
        .bind(&task.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            meal_plan_id = %task.belongs_to_meal_plan,
            task_id = %task.id,
            from = previous.as_str(),
            to = task.status.as_str(),
            changed_by = %input.changed_by_user,
            "Changed meal plan task status"
        );

        Ok((task, previous))
    }
}

async fn insert_task(
    conn: &mut SqliteConnection,
    plan_id: &str,
    input: &MealPlanTaskDatabaseCreationInput,
    now: DateTime<Utc>,
) -> Result<MealPlanTask> {
    let created_at = to_millis(now);

    sqlx::query(
        r#"
        INSERT INTO meal_plan_tasks (
            id, belongs_to_meal_plan, belongs_to_meal_plan_option, belongs_to_recipe_prep_task,
            status, creation_explanation, status_explanation, assigned_to_user,
            storage_type, explicit_storage_instructions,
            minimum_time_buffer_before_recipe_in_seconds, maximum_time_buffer_before_recipe_in_seconds,
            cannot_complete_before, cannot_complete_after, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&input.id)
    .bind(plan_id)
    .bind(&input.belongs_to_meal_plan_option)
    .bind(&input.recipe_prep_task_id)
    .bind(MealPlanTaskStatus::Unfinished.as_str())
    .bind(&input.creation_explanation)
    .bind(&input.status_explanation)
    .bind(&input.assigned_to_user)
    .bind(&input.storage_type)
    .bind(&input.explicit_storage_instructions)
    .bind(i64::from(input.minimum_time_buffer_seconds))
    .bind(input.maximum_time_buffer_seconds.map(i64::from))
    .bind(input.cannot_complete_before.map(to_millis))
    .bind(input.cannot_complete_after.map(to_millis))
    .bind(created_at)
    .execute(&mut *conn)
    .await?;

    Ok(MealPlanTask {
        id: input.id.clone(),
        belongs_to_meal_plan: plan_id.to_string(),
        belongs_to_meal_plan_option: input.belongs_to_meal_plan_option.clone(),
        recipe_prep_task_id: input.recipe_prep_task_id.clone(),
        status: MealPlanTaskStatus::Unfinished,
        creation_explanation: input.creation_explanation.clone(),
        status_explanation: input.status_explanation.clone(),
        assigned_to_user: input.assigned_to_user.clone(),
        storage_type: input.storage_type.clone(),
        explicit_storage_instructions: input.explicit_storage_instructions.clone(),
        minimum_time_buffer_seconds: input.minimum_time_buffer_seconds,
        maximum_time_buffer_seconds: input.maximum_time_buffer_seconds,
        cannot_complete_before: input.cannot_complete_before.map(|t| from_millis(to_millis(t))),
        cannot_complete_after: input.cannot_complete_after.map(|t| from_millis(to_millis(t))),
        completed_at: None,
        created_at: from_millis(created_at),
        last_updated_at: None,
        archived_at: None,
    })
}

async fn load_task(conn: &mut SqliteConnection, plan_id: &str, task_id: &str) -> Result<MealPlanTask> {
    let row = sqlx::query(
        r#"
        SELECT * FROM meal_plan_tasks
        WHERE id = ? AND belongs_to_meal_plan = ? AND archived_at IS NULL
        "#,
    )
    .bind(task_id)
    .bind(plan_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| Error::NotFound(format!("meal plan task {}", task_id)))?;

    task_from_row(&row)
}

fn task_from_row(row: &SqliteRow) -> Result<MealPlanTask> {
    Ok(MealPlanTask {
        id: row.try_get("id")?,
        belongs_to_meal_plan: row.try_get("belongs_to_meal_plan")?,
        belongs_to_meal_plan_option: row.try_get("belongs_to_meal_plan_option")?,
        recipe_prep_task_id: row.try_get("belongs_to_recipe_prep_task")?,
        status: get_enum(row, "status", MealPlanTaskStatus::from_str)?,
        creation_explanation: row.try_get("creation_explanation")?,
        status_explanation: row.try_get("status_explanation")?,
        assigned_to_user: row.try_get("assigned_to_user")?,
        storage_type: row.try_get("storage_type")?,
        explicit_storage_instructions: row.try_get("explicit_storage_instructions")?,
        minimum_time_buffer_seconds: get_u32(row, "minimum_time_buffer_before_recipe_in_seconds")?,
        maximum_time_buffer_seconds: get_opt_u32(row, "maximum_time_buffer_before_recipe_in_seconds")?,
        cannot_complete_before: get_opt_instant(row, "cannot_complete_before")?,
        cannot_complete_after: get_opt_instant(row, "cannot_complete_after")?,
        completed_at: get_opt_instant(row, "completed_at")?,
        created_at: get_instant(row, "created_at")?,
        last_updated_at: get_opt_instant(row, "last_updated_at")?,
        archived_at: get_opt_instant(row, "archived_at")?,
    })
}
