//! Ballot casting

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use mealplan_common::db::{MealPlanOptionVote, MealPlanOptionVotesCreationInput, MealPlanStatus};
use mealplan_common::time::to_millis;
use mealplan_common::{Error, Result};
use tracing::info;

use super::meal_plans::vote_from_row;
use super::Store;

impl Store {
    /// Cast one user's ballot for one event, replacing any earlier ballot
    ///
    /// Fails with `Conflict` once the plan is finalized and with
    /// `InvalidInput` for options outside the event or non-dense ranks.
    pub async fn create_meal_plan_option_votes(
        &self,
        plan_id: &str,
        household_id: &str,
        event_id: &str,
        input: &MealPlanOptionVotesCreationInput,
        now: DateTime<Utc>,
    ) -> Result<Vec<MealPlanOptionVote>> {
        input.validate()?;

        let now_millis = to_millis(now);
        let mut tx = self.pool.begin().await?;

        // Take the writer lock before reading status so a racing finalizer is serialized with us
        let locked = sqlx::query(
            "UPDATE meal_plans SET id = id WHERE id = ? AND belongs_to_household = ? AND archived_at IS NULL",
        )
        .bind(plan_id)
        .bind(household_id)
        .execute(&mut *tx)
        .await?;
        if locked.rows_affected() == 0 {
            return Err(Error::NotFound(format!("meal plan {}", plan_id)));
        }

        let status: String = sqlx::query_scalar("SELECT status FROM meal_plans WHERE id = ?")
            .bind(plan_id)
            .fetch_one(&mut *tx)
            .await?;
        if MealPlanStatus::from_str(&status) == Some(MealPlanStatus::Finalized) {
            return Err(Error::Conflict(format!(
                "meal plan {} is finalized; votes are closed",
                plan_id
            )));
        }

        let option_ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT o.id FROM meal_plan_options o
            JOIN meal_plan_events e ON e.id = o.belongs_to_meal_plan_event
            WHERE e.id = ? AND e.belongs_to_meal_plan = ?
              AND e.archived_at IS NULL AND o.archived_at IS NULL
            "#,
        )
        .bind(event_id)
        .bind(plan_id)
        .fetch_all(&mut *tx)
        .await?;

        if option_ids.is_empty() {
            return Err(Error::NotFound(format!(
                "meal plan event {} in plan {}",
                event_id, plan_id
            )));
        }

        let known: HashSet<&str> = option_ids.iter().map(String::as_str).collect();
        if let Some(stray) = input
            .votes
            .iter()
            .find(|vote| !known.contains(vote.belongs_to_meal_plan_option.as_str()))
        {
            return Err(Error::InvalidInput(format!(
                "option {} does not belong to event {}",
                stray.belongs_to_meal_plan_option, event_id
            )));
        }

        let superseded = sqlx::query(
            r#"
            UPDATE meal_plan_option_votes SET archived_at = ?
            WHERE by_user = ? AND archived_at IS NULL
              AND belongs_to_meal_plan_option IN (
                  SELECT id FROM meal_plan_options WHERE belongs_to_meal_plan_event = ?
              )
            "#,
        )
        .bind(now_millis)
        .bind(&input.by_user)
        .bind(event_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        for vote in &input.votes {
            sqlx::query(
                r#"
                INSERT INTO meal_plan_option_votes (
                    id, rank, abstain, notes, by_user, belongs_to_meal_plan_option, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&vote.id)
            .bind(vote.rank as i64)
            .bind(vote.abstain)
            .bind(&vote.notes)
            .bind(&input.by_user)
            .bind(&vote.belongs_to_meal_plan_option)
            .bind(now_millis)
            .execute(&mut *tx)
            .await?;
        }

        let rows = sqlx::query(
            r#"
            SELECT v.* FROM meal_plan_option_votes v
            JOIN meal_plan_options o ON o.id = v.belongs_to_meal_plan_option
            WHERE o.belongs_to_meal_plan_event = ? AND v.by_user = ? AND v.archived_at IS NULL
            ORDER BY v.rank, v.id
            "#,
        )
        .bind(event_id)
        .bind(&input.by_user)
        .fetch_all(&mut *tx)
        .await?;
        let votes = rows.iter().map(vote_from_row).collect::<Result<Vec<_>>>()?;

        tx.commit().await?;

        info!(
            meal_plan_id = %plan_id,
            event_id = %event_id,
            by_user = %input.by_user,
            vote_count = votes.len(),
            superseded,
            "Recorded ballot"
        );

        Ok(votes)
    }
}
