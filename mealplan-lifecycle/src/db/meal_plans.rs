//! Meal plan reads, creation and finalization

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use mealplan_common::db::{
    ElectionMethod, MealName, MealPlan, MealPlanDatabaseCreationInput, MealPlanEvent,
    MealPlanOption, MealPlanOptionVote, MealPlanStatus,
};
use mealplan_common::events::ChosenOptionSummary;
use mealplan_common::time::to_millis;
use mealplan_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::{debug, info};

use super::recipes::{attach_meals, MealCache};
use super::{get_bool, get_enum, get_instant, get_opt_instant, get_u32, Store};
use crate::tally::{self, Verdict};

/// Who is asking for finalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeRequest {
    /// Periodic sweep: only plans past their voting deadline are finalized
    Sweeper,
    /// Explicit user request: ignores the deadline. `force` picks the
    /// smallest option id for events nobody voted on instead of failing.
    User { user_id: String, force: bool },
}

impl FinalizeRequest {
    /// User id to stamp on the resulting change event
    pub fn actor(&self) -> &str {
        match self {
            FinalizeRequest::Sweeper => mealplan_common::events::SYSTEM_USER_ID,
            FinalizeRequest::User { user_id, .. } => user_id,
        }
    }

    fn force(&self) -> bool {
        matches!(self, FinalizeRequest::User { force: true, .. })
    }
}

/// Result of one finalization attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizationOutcome {
    /// False when the plan was already finalized or its deadline has not passed
    pub changed: bool,
    /// Chosen option per event, in event order; empty when unchanged
    pub chosen_options: Vec<ChosenOptionSummary>,
}

impl FinalizationOutcome {
    fn unchanged() -> Self {
        Self {
            changed: false,
            chosen_options: Vec::new(),
        }
    }
}

/// Plan flags gating the grocery and task passes
#[derive(Debug, Clone, Copy)]
pub(crate) enum PlanFlag {
    GroceryListInitialized,
    TasksCreated,
}

impl PlanFlag {
    fn column(self) -> &'static str {
        match self {
            PlanFlag::GroceryListInitialized => "grocery_list_initialized",
            PlanFlag::TasksCreated => "tasks_created",
        }
    }
}

impl Store {
    /// Create a plan in awaiting_votes with its events and options
    pub async fn create_meal_plan(
        &self,
        input: &MealPlanDatabaseCreationInput,
        default_election_method: ElectionMethod,
        now: DateTime<Utc>,
    ) -> Result<MealPlan> {
        input.validate(now)?;

        let election_method = input.election_method.unwrap_or(default_election_method);
        let created_at = to_millis(now);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO meal_plans (
                id, notes, status, voting_deadline, election_method,
                belongs_to_household, created_by_user, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&input.id)
        .bind(&input.notes)
        .bind(MealPlanStatus::AwaitingVotes.as_str())
        .bind(to_millis(input.voting_deadline))
        .bind(election_method.as_str())
        .bind(&input.belongs_to_household)
        .bind(&input.created_by_user)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        for event in &input.events {
            sqlx::query(
                r#"
                INSERT INTO meal_plan_events (
                    id, notes, starts_at, ends_at, meal_name, belongs_to_meal_plan, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&event.id)
            .bind(&event.notes)
            .bind(to_millis(event.starts_at))
            .bind(to_millis(event.ends_at))
            .bind(event.meal_name.as_str())
            .bind(&input.id)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;

            for option in &event.options {
                sqlx::query(
                    r#"
                    INSERT INTO meal_plan_options (
                        id, meal_id, meal_scale, assigned_cook, assigned_dishwasher,
                        notes, belongs_to_meal_plan_event, created_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&option.id)
                .bind(&option.meal_id)
                .bind(option.meal_scale)
                .bind(&option.assigned_cook)
                .bind(&option.assigned_dishwasher)
                .bind(&option.notes)
                .bind(&event.id)
                .bind(created_at)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        info!(
            meal_plan_id = %input.id,
            household_id = %input.belongs_to_household,
            event_count = input.events.len(),
            election_method = election_method.as_str(),
            "Created meal plan"
        );

        self.get_meal_plan(&input.id, &input.belongs_to_household).await
    }

    /// Plan with events, options and votes; archived rows excluded
    pub async fn get_meal_plan(&self, plan_id: &str, household_id: &str) -> Result<MealPlan> {
        let mut conn = self.pool.acquire().await?;
        load_meal_plan(&mut conn, plan_id, Some(household_id), false)
            .await?
            .ok_or_else(|| Error::NotFound(format!("meal plan {}", plan_id)))
    }

    /// Like [`Store::get_meal_plan`] but archived plans, events, options and votes are returned too
    pub async fn get_meal_plan_including_archived(
        &self,
        plan_id: &str,
        household_id: &str,
    ) -> Result<MealPlan> {
        let mut conn = self.pool.acquire().await?;
        load_meal_plan(&mut conn, plan_id, Some(household_id), true)
            .await?
            .ok_or_else(|| Error::NotFound(format!("meal plan {}", plan_id)))
    }

    /// Plans still awaiting votes whose deadline is at or before `now`
    pub async fn get_unfinalized_meal_plans_with_expired_voting_periods(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<MealPlan>> {
        let mut conn = self.pool.acquire().await?;

        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM meal_plans
            WHERE status = 'awaiting_votes'
              AND voting_deadline <= ?
              AND archived_at IS NULL
            ORDER BY voting_deadline, id
            "#,
        )
        .bind(to_millis(now))
        .fetch_all(&mut *conn)
        .await?;

        let mut plans = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(plan) = load_meal_plan(&mut conn, &id, None, false).await? {
                plans.push(plan);
            }
        }

        debug!(count = plans.len(), "Loaded meal plans with expired voting periods");
        Ok(plans)
    }

    /// Finalized plans without a grocery list, with meals and recipes eagerly loaded
    pub async fn get_finalized_meal_plans_with_uninitialized_grocery_lists(&self) -> Result<Vec<MealPlan>> {
        self.finalized_plans_missing(PlanFlag::GroceryListInitialized).await
    }

    /// Finalized plans without generated tasks, with meals and recipes eagerly loaded
    pub async fn get_finalized_meal_plans_without_tasks(&self) -> Result<Vec<MealPlan>> {
        self.finalized_plans_missing(PlanFlag::TasksCreated).await
    }

    async fn finalized_plans_missing(&self, flag: PlanFlag) -> Result<Vec<MealPlan>> {
        let mut conn = self.pool.acquire().await?;

        let query = format!(
            "SELECT id FROM meal_plans
             WHERE status = 'finalized' AND {} = 0 AND archived_at IS NULL
             ORDER BY created_at, id",
            flag.column()
        );
        let ids: Vec<String> = sqlx::query_scalar(&query).fetch_all(&mut *conn).await?;

        let mut cache = MealCache::default();
        let mut plans = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(mut plan) = load_meal_plan(&mut conn, &id, None, false).await? {
                attach_meals(&mut conn, &mut plan, &mut cache).await?;
                plans.push(plan);
            }
        }

        debug!(
            flag = flag.column(),
            count = plans.len(),
            "Loaded finalized meal plans awaiting work"
        );
        Ok(plans)
    }

    /// Set grocery_list_initialized on a finalized plan
    pub async fn mark_meal_plan_grocery_list_initialized(&self, plan_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.mark_flag(plan_id, PlanFlag::GroceryListInitialized, now).await
    }

    /// Set tasks_created on a finalized plan
    pub async fn mark_meal_plan_tasks_created(&self, plan_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.mark_flag(plan_id, PlanFlag::TasksCreated, now).await
    }

    async fn mark_flag(&self, plan_id: &str, flag: PlanFlag, now: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM meal_plans WHERE id = ? AND archived_at IS NULL")
                .bind(plan_id)
                .fetch_optional(&mut *tx)
                .await?;

        match status.as_deref().and_then(MealPlanStatus::from_str) {
            None => return Err(Error::NotFound(format!("meal plan {}", plan_id))),
            Some(MealPlanStatus::AwaitingVotes) => {
                return Err(Error::Conflict(format!(
                    "meal plan {} is not finalized; cannot set {}",
                    plan_id,
                    flag.column()
                )))
            }
            Some(MealPlanStatus::Finalized) => {}
        }

        let query = format!(
            "UPDATE meal_plans SET {} = 1, last_updated_at = ? WHERE id = ?",
            flag.column()
        );
        sqlx::query(&query)
            .bind(to_millis(now))
            .bind(plan_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Atomically move a plan from awaiting_votes to finalized
    ///
    /// The transaction opens with a write on the plan row, so concurrent
    /// finalizers of the same plan queue on SQLite's writer lock and the
    /// later one observes the committed status. Events that already hold a
    /// chosen option keep it; events without options are left alone.
    pub async fn attempt_to_finalize_meal_plan(
        &self,
        plan_id: &str,
        household_id: &str,
        request: &FinalizeRequest,
        now: DateTime<Utc>,
    ) -> Result<FinalizationOutcome> {
        let now_millis = to_millis(now);
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query(
            r#"
            UPDATE meal_plans SET id = id
            WHERE id = ? AND belongs_to_household = ? AND archived_at IS NULL
            "#,
        )
        .bind(plan_id)
        .bind(household_id)
        .execute(&mut *tx)
        .await?;

        if locked.rows_affected() == 0 {
            return Err(Error::NotFound(format!("meal plan {}", plan_id)));
        }

        let plan = load_meal_plan(&mut *tx, plan_id, Some(household_id), false)
            .await?
            .ok_or_else(|| Error::NotFound(format!("meal plan {}", plan_id)))?;

        if plan.is_finalized() {
            debug!(meal_plan_id = %plan_id, "Meal plan already finalized");
            return Ok(FinalizationOutcome::unchanged());
        }

        if *request == FinalizeRequest::Sweeper && !plan.voting_deadline_passed(now) {
            debug!(meal_plan_id = %plan_id, "Voting deadline not reached, skipping");
            return Ok(FinalizationOutcome::unchanged());
        }

        let verdicts = decide_events(&plan, request.force())?;

        for (event_id, verdict) in &verdicts {
            sqlx::query(
                r#"
                UPDATE meal_plan_options
                SET chosen = 0, tiebroken = 0, last_updated_at = ?
                WHERE belongs_to_meal_plan_event = ? AND archived_at IS NULL
                "#,
            )
            .bind(now_millis)
            .bind(event_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE meal_plan_options SET chosen = 1, tiebroken = ?, last_updated_at = ? WHERE id = ?",
            )
            .bind(verdict.tie_broken)
            .bind(now_millis)
            .bind(&verdict.option_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE meal_plans SET status = ?, last_updated_at = ? WHERE id = ?")
            .bind(MealPlanStatus::Finalized.as_str())
            .bind(now_millis)
            .bind(plan_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        // Events decided earlier keep their choice and still belong in the summary
        let decided: HashMap<&str, &Verdict> =
            verdicts.iter().map(|(event_id, v)| (event_id.as_str(), v)).collect();
        let chosen_options = plan
            .events
            .iter()
            .filter_map(|event| match decided.get(event.id.as_str()) {
                Some(verdict) => Some(ChosenOptionSummary {
                    meal_plan_event_id: event.id.clone(),
                    meal_plan_option_id: verdict.option_id.clone(),
                    tie_broken: verdict.tie_broken,
                }),
                None => event.chosen_option().map(|option| ChosenOptionSummary {
                    meal_plan_event_id: event.id.clone(),
                    meal_plan_option_id: option.id.clone(),
                    tie_broken: option.tie_broken,
                }),
            })
            .collect();

        info!(
            meal_plan_id = %plan_id,
            household_id = %household_id,
            decided_events = verdicts.len(),
            "Finalized meal plan"
        );

        Ok(FinalizationOutcome {
            changed: true,
            chosen_options,
        })
    }
}

/// Tally every undecided event of `plan`
///
/// Fails with `InsufficientVotes` naming every event that has several
/// options and no ranked votes, unless `force` is set.
fn decide_events(plan: &MealPlan, force: bool) -> Result<Vec<(String, Verdict)>> {
    let mut verdicts = Vec::new();
    let mut unvoted = Vec::new();

    for event in &plan.events {
        if event.chosen_option().is_some() || event.options.is_empty() {
            continue;
        }

        let option_ids: Vec<String> = event.options.iter().map(|o| o.id.clone()).collect();

        if event.ranked_vote_count() == 0 && option_ids.len() > 1 {
            if !force {
                unvoted.push(event.id.clone());
                continue;
            }
            if let Some(smallest) = option_ids.iter().min() {
                verdicts.push((
                    event.id.clone(),
                    Verdict {
                        option_id: smallest.clone(),
                        tie_broken: true,
                    },
                ));
            }
            continue;
        }

        let ballots = tally::ballots_from_votes(event.options.iter().flat_map(|o| o.votes.iter()));
        let verdict = tally::decide(plan.election_method, &option_ids, &ballots)?;
        debug!(
            meal_plan_id = %plan.id,
            event_id = %event.id,
            option_id = %verdict.option_id,
            tie_broken = verdict.tie_broken,
            ballots = ballots.len(),
            "Decided meal plan event"
        );
        verdicts.push((event.id.clone(), verdict));
    }

    if !unvoted.is_empty() {
        return Err(Error::InsufficientVotes {
            meal_plan_id: plan.id.clone(),
            event_ids: unvoted,
        });
    }

    Ok(verdicts)
}

// ========================================
// Loading
// ========================================

/// Load one plan with its events, options and votes
///
/// `household_id` of `None` skips the ownership check (worker scans).
pub(crate) async fn load_meal_plan(
    conn: &mut SqliteConnection,
    plan_id: &str,
    household_id: Option<&str>,
    include_archived: bool,
) -> Result<Option<MealPlan>> {
    let row = sqlx::query(
        r#"
        SELECT * FROM meal_plans
        WHERE id = ?
          AND (? IS NULL OR belongs_to_household = ?)
          AND (? OR archived_at IS NULL)
        "#,
    )
    .bind(plan_id)
    .bind(household_id)
    .bind(household_id)
    .bind(include_archived)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut plan = meal_plan_from_row(&row)?;

    let event_rows = sqlx::query(
        r#"
        SELECT * FROM meal_plan_events
        WHERE belongs_to_meal_plan = ? AND (? OR archived_at IS NULL)
        ORDER BY starts_at, id
        "#,
    )
    .bind(plan_id)
    .bind(include_archived)
    .fetch_all(&mut *conn)
    .await?;

    let option_rows = sqlx::query(
        r#"
        SELECT o.* FROM meal_plan_options o
        JOIN meal_plan_events e ON e.id = o.belongs_to_meal_plan_event
        WHERE e.belongs_to_meal_plan = ?
          AND (? OR (o.archived_at IS NULL AND e.archived_at IS NULL))
        ORDER BY o.id
        "#,
    )
    .bind(plan_id)
    .bind(include_archived)
    .fetch_all(&mut *conn)
    .await?;

    let vote_rows = sqlx::query(
        r#"
        SELECT v.* FROM meal_plan_option_votes v
        JOIN meal_plan_options o ON o.id = v.belongs_to_meal_plan_option
        JOIN meal_plan_events e ON e.id = o.belongs_to_meal_plan_event
        WHERE e.belongs_to_meal_plan = ?
          AND (? OR (v.archived_at IS NULL AND o.archived_at IS NULL AND e.archived_at IS NULL))
        ORDER BY v.by_user, v.rank, v.id
        "#,
    )
    .bind(plan_id)
    .bind(include_archived)
    .fetch_all(&mut *conn)
    .await?;

    let mut votes_by_option: HashMap<String, Vec<MealPlanOptionVote>> = HashMap::new();
    for row in &vote_rows {
        let vote = vote_from_row(row)?;
        votes_by_option
            .entry(vote.belongs_to_meal_plan_option.clone())
            .or_default()
            .push(vote);
    }

    let mut options_by_event: HashMap<String, Vec<MealPlanOption>> = HashMap::new();
    for row in &option_rows {
        let mut option = option_from_row(row)?;
        option.votes = votes_by_option.remove(&option.id).unwrap_or_default();
        options_by_event
            .entry(option.belongs_to_meal_plan_event.clone())
            .or_default()
            .push(option);
    }

    for row in &event_rows {
        let mut event = event_from_row(row)?;
        event.options = options_by_event.remove(&event.id).unwrap_or_default();
        plan.events.push(event);
    }

    Ok(Some(plan))
}

fn meal_plan_from_row(row: &SqliteRow) -> Result<MealPlan> {
    Ok(MealPlan {
        id: row.try_get("id")?,
        notes: row.try_get("notes")?,
        status: get_enum(row, "status", MealPlanStatus::from_str)?,
        voting_deadline: get_instant(row, "voting_deadline")?,
        election_method: get_enum(row, "election_method", ElectionMethod::from_str)?,
        grocery_list_initialized: get_bool(row, "grocery_list_initialized")?,
        tasks_created: get_bool(row, "tasks_created")?,
        belongs_to_household: row.try_get("belongs_to_household")?,
        created_by_user: row.try_get("created_by_user")?,
        created_at: get_instant(row, "created_at")?,
        last_updated_at: get_opt_instant(row, "last_updated_at")?,
        archived_at: get_opt_instant(row, "archived_at")?,
        events: Vec::new(),
    })
}

fn event_from_row(row: &SqliteRow) -> Result<MealPlanEvent> {
    Ok(MealPlanEvent {
        id: row.try_get("id")?,
        notes: row.try_get("notes")?,
        starts_at: get_instant(row, "starts_at")?,
        ends_at: get_instant(row, "ends_at")?,
        meal_name: get_enum(row, "meal_name", MealName::from_str)?,
        belongs_to_meal_plan: row.try_get("belongs_to_meal_plan")?,
        created_at: get_instant(row, "created_at")?,
        last_updated_at: get_opt_instant(row, "last_updated_at")?,
        archived_at: get_opt_instant(row, "archived_at")?,
        options: Vec::new(),
    })
}

fn option_from_row(row: &SqliteRow) -> Result<MealPlanOption> {
    Ok(MealPlanOption {
        id: row.try_get("id")?,
        meal_id: row.try_get("meal_id")?,
        meal_scale: row.try_get("meal_scale")?,
        chosen: get_bool(row, "chosen")?,
        tie_broken: get_bool(row, "tiebroken")?,
        assigned_cook: row.try_get("assigned_cook")?,
        assigned_dishwasher: row.try_get("assigned_dishwasher")?,
        notes: row.try_get("notes")?,
        belongs_to_meal_plan_event: row.try_get("belongs_to_meal_plan_event")?,
        created_at: get_instant(row, "created_at")?,
        last_updated_at: get_opt_instant(row, "last_updated_at")?,
        archived_at: get_opt_instant(row, "archived_at")?,
        votes: Vec::new(),
        meal: None,
    })
}

pub(crate) fn vote_from_row(row: &SqliteRow) -> Result<MealPlanOptionVote> {
    Ok(MealPlanOptionVote {
        id: row.try_get("id")?,
        rank: get_u32(row, "rank")?,
        abstain: get_bool(row, "abstain")?,
        notes: row.try_get("notes")?,
        by_user: row.try_get("by_user")?,
        belongs_to_meal_plan_option: row.try_get("belongs_to_meal_plan_option")?,
        created_at: get_instant(row, "created_at")?,
        last_updated_at: get_opt_instant(row, "last_updated_at")?,
        archived_at: get_opt_instant(row, "archived_at")?,
    })
}

/// Set a plan flag if it is unset and the plan is finalized
///
/// Returns false when another pass already set it; the caller skips the plan.
pub(crate) async fn claim_flag(
    conn: &mut SqliteConnection,
    plan_id: &str,
    flag: PlanFlag,
    now: DateTime<Utc>,
) -> Result<bool> {
    let query = format!(
        "UPDATE meal_plans SET {column} = 1, last_updated_at = ?
         WHERE id = ? AND {column} = 0 AND status = 'finalized' AND archived_at IS NULL",
        column = flag.column()
    );
    let result = sqlx::query(&query)
        .bind(to_millis(now))
        .bind(plan_id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() == 1)
}
