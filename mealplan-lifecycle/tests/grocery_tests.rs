//! Integration tests for grocery list initialization and item updates

mod helpers;

use helpers::*;
use mealplan_common::db::{
    GroceryListItemStatus, MealPlanGroceryListItemDatabaseCreationInput,
    MealPlanGroceryListItemUpdateRequestInput,
};
use mealplan_common::events::{ChangeEventType, ChangePayload};
use mealplan_common::ErrorKind;
use mealplan_lifecycle::FinalizeRequest;
use tokio_util::sync::CancellationToken;

async fn finalize(harness: &Harness, plan_id: &str) {
    let changed = harness
        .coordinator
        .attempt_finalize(plan_id, HOUSEHOLD, &FinalizeRequest::Sweeper, &CancellationToken::new())
        .await
        .unwrap();
    assert!(changed, "plan {} should finalize", plan_id);
}

/// Stew: 100 g onion, an optional garnish and an intermediate roux
async fn seed_stew(harness: &Harness) {
    seed_recipe(
        &harness.pool,
        "recipe-stew",
        &[
            ingredient("onion", "grams", 100.0),
            IngredientFixture {
                optional: true,
                ..ingredient("parsley", "grams", 5.0)
            },
            IngredientFixture {
                ingredient: None,
                ..ingredient("roux", "grams", 50.0)
            },
        ],
        &[],
    )
    .await;
    seed_meal(&harness.pool, "meal-stew", &[("recipe-stew", 1.0)]).await;
}

/// Finalized two-event plan serving the stew at scale 1.0 and 1.5
async fn finalized_stew_plan(harness: &Harness) {
    create_expired_plan(
        harness,
        "plan-1",
        None,
        vec![
            event("event-1", &[("option-1", "meal-stew", 1.0)]),
            event("event-2", &[("option-2", "meal-stew", 1.5)]),
        ],
    )
    .await;
    finalize(harness, "plan-1").await;
}

#[tokio::test]
async fn test_worker_builds_consolidated_list() {
    let mut harness = Harness::in_memory().await;
    seed_stew(&harness).await;
    finalized_stew_plan(&harness).await;
    harness.drain_events();

    let report = harness
        .grocery_list_initializer()
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.changed_count, 1);
    assert_eq!(report.failed_count(), 0);

    let items = harness
        .store
        .get_meal_plan_grocery_list_items_for_meal_plan("plan-1")
        .await
        .unwrap();
    assert_eq!(items.len(), 1, "optional and intermediate ingredients are skipped");
    let onion = &items[0];
    assert_eq!(onion.valid_ingredient, "onion");
    assert_eq!(onion.valid_measurement_unit, "grams");
    assert!((onion.minimum_quantity_needed - 250.0).abs() < 1e-9);
    assert_eq!(onion.maximum_quantity_needed, None);
    assert_eq!(onion.status, GroceryListItemStatus::Unknown);

    assert!(harness.plan("plan-1").await.grocery_list_initialized);

    let events = harness.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type(), ChangeEventType::MealPlanGroceryListItemCreated);
    assert_eq!(events[0].user_id, "system");
    match &events[0].payload {
        ChangePayload::MealPlanGroceryListItemCreated { grocery_list_item } => {
            assert_eq!(grocery_list_item.id, onion.id);
        }
        other => panic!("unexpected payload {:?}", other),
    }
}

#[tokio::test]
async fn test_second_sweep_is_a_no_op() {
    let mut harness = Harness::in_memory().await;
    seed_stew(&harness).await;
    finalized_stew_plan(&harness).await;

    let cancel = CancellationToken::new();
    let snapshot = harness
        .store
        .get_finalized_meal_plans_with_uninitialized_grocery_lists()
        .await
        .unwrap();
    assert_eq!(snapshot.len(), 1);

    let initializer = harness.grocery_list_initializer();
    initializer.run_once(&cancel).await.unwrap();
    harness.drain_events();

    let report = initializer.run_once(&cancel).await.unwrap();
    assert_eq!(report.examined, 0);
    assert_eq!(report.changed_count, 0);

    // A builder holding a snapshot from before the first sweep loses the flag claim
    let again = harness
        .builder
        .initialize_for_plan(&snapshot[0], &cancel)
        .await
        .unwrap();
    assert!(again.is_none());
    assert!(harness.drain_events().is_empty());
    assert_eq!(
        harness
            .store
            .get_meal_plan_grocery_list_items_for_meal_plan("plan-1")
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_units_fold_into_convertible_unit() {
    let harness = Harness::in_memory().await;
    seed_conversion(&harness.pool, "conv-cups-ml", "cups", "ml", None, 240.0).await;
    seed_conversion(&harness.pool, "conv-flour-cups-grams", "cups", "grams", Some("flour"), 120.0).await;

    seed_recipe(
        &harness.pool,
        "recipe-pancakes",
        &[
            ingredient("flour", "cups", 2.0),
            ingredient("flour", "grams", 300.0),
            ingredient("milk", "cups", 1.0),
            ingredient("milk", "ml", 130.0),
        ],
        &[],
    )
    .await;
    seed_meal(&harness.pool, "meal-pancakes", &[("recipe-pancakes", 1.0)]).await;
    create_expired_plan(
        &harness,
        "plan-1",
        None,
        vec![event("event-1", &[("option-1", "meal-pancakes", 1.0)])],
    )
    .await;
    finalize(&harness, "plan-1").await;

    harness
        .grocery_list_initializer()
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    let items = harness
        .store
        .get_meal_plan_grocery_list_items_for_meal_plan("plan-1")
        .await
        .unwrap();
    let lines: Vec<(&str, &str, f64)> = items
        .iter()
        .map(|i| {
            (
                i.valid_ingredient.as_str(),
                i.valid_measurement_unit.as_str(),
                i.minimum_quantity_needed,
            )
        })
        .collect();

    assert_eq!(lines.len(), 2);
    assert_eq!((lines[0].0, lines[0].1), ("flour", "grams"));
    assert!((lines[0].2 - 540.0).abs() < 1e-9);
    assert_eq!((lines[1].0, lines[1].1), ("milk", "ml"));
    assert!((lines[1].2 - 370.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_acquired_item_update_emits_event() {
    let mut harness = Harness::in_memory().await;
    seed_stew(&harness).await;
    finalized_stew_plan(&harness).await;
    harness
        .grocery_list_initializer()
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    harness.drain_events();

    let item = harness
        .store
        .get_meal_plan_grocery_list_items_for_meal_plan("plan-1")
        .await
        .unwrap()
        .remove(0);

    let patch = MealPlanGroceryListItemUpdateRequestInput {
        status: Some(GroceryListItemStatus::Acquired),
        quantity_purchased: Some(300.0),
        purchased_measurement_unit: Some("grams".to_string()),
        purchased_upc: Some("0123456789012".to_string()),
        purchase_price: Some(2.49),
        ..Default::default()
    };
    let updated = harness
        .builder
        .update_item("plan-1", HOUSEHOLD, &item.id, &patch, "user-shopper")
        .await
        .unwrap();

    assert_eq!(updated.status, GroceryListItemStatus::Acquired);
    assert_eq!(updated.quantity_purchased, Some(300.0));
    assert_eq!(updated.purchased_upc.as_deref(), Some("0123456789012"));
    assert!(updated.last_updated_at.is_some());
    assert!((updated.minimum_quantity_needed - 250.0).abs() < 1e-9);

    let stored = harness
        .store
        .get_meal_plan_grocery_list_item("plan-1", &item.id)
        .await
        .unwrap();
    assert_eq!(stored.status, GroceryListItemStatus::Acquired);
    assert_eq!(stored.purchase_price, Some(2.49));

    let events = harness.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type(), ChangeEventType::MealPlanGroceryListItemUpdated);
    assert_eq!(events[0].user_id, "user-shopper");
}

#[tokio::test]
async fn test_purchase_details_require_acquired_status() {
    let mut harness = Harness::in_memory().await;
    seed_stew(&harness).await;
    finalized_stew_plan(&harness).await;
    harness
        .grocery_list_initializer()
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    harness.drain_events();

    let item = harness
        .store
        .get_meal_plan_grocery_list_items_for_meal_plan("plan-1")
        .await
        .unwrap()
        .remove(0);

    let patch = MealPlanGroceryListItemUpdateRequestInput {
        status: Some(GroceryListItemStatus::Needs),
        purchase_price: Some(1.0),
        ..Default::default()
    };
    let err = harness
        .builder
        .update_item("plan-1", HOUSEHOLD, &item.id, &patch, "user-shopper")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadInput);

    let stored = harness
        .store
        .get_meal_plan_grocery_list_item("plan-1", &item.id)
        .await
        .unwrap();
    assert_eq!(stored, item);
    assert!(harness.drain_events().is_empty());

    // Status alone is fine
    let needs = MealPlanGroceryListItemUpdateRequestInput {
        status: Some(GroceryListItemStatus::Needs),
        status_explanation: Some("out of onions".to_string()),
        ..Default::default()
    };
    let updated = harness
        .builder
        .update_item("plan-1", HOUSEHOLD, &item.id, &needs, "user-shopper")
        .await
        .unwrap();
    assert_eq!(updated.status, GroceryListItemStatus::Needs);
    assert_eq!(updated.status_explanation, "out of onions");
}

#[tokio::test]
async fn test_update_from_other_household_is_not_found() {
    let harness = Harness::in_memory().await;
    seed_stew(&harness).await;
    finalized_stew_plan(&harness).await;
    harness
        .grocery_list_initializer()
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    let item = harness
        .store
        .get_meal_plan_grocery_list_items_for_meal_plan("plan-1")
        .await
        .unwrap()
        .remove(0);

    let patch = MealPlanGroceryListItemUpdateRequestInput {
        status: Some(GroceryListItemStatus::AlreadyOwned),
        ..Default::default()
    };
    let err = harness
        .builder
        .update_item("plan-1", "household-2", &item.id, &patch, "user-stranger")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let missing = harness
        .builder
        .update_item("plan-1", HOUSEHOLD, "item-404", &patch, OWNER)
        .await
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_discovery_skips_archived_and_unfinalized_plans() {
    let harness = Harness::in_memory().await;
    seed_stew(&harness).await;
    finalized_stew_plan(&harness).await;
    create_open_plan(
        &harness,
        "plan-2",
        None,
        vec![event("event-3", &[("option-3", "meal-stew", 1.0)])],
    )
    .await;

    sqlx::query("UPDATE meal_plans SET archived_at = 1 WHERE id = 'plan-1'")
        .execute(&harness.pool)
        .await
        .unwrap();

    let report = harness
        .grocery_list_initializer()
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.examined, 0);
    assert!(harness
        .store
        .get_meal_plan_grocery_list_items_for_meal_plan("plan-1")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_flags_require_finalized_plan() {
    let harness = Harness::in_memory().await;
    seed_stew(&harness).await;
    create_open_plan(
        &harness,
        "plan-1",
        None,
        vec![event("event-1", &[("option-1", "meal-stew", 1.0)])],
    )
    .await;
    let now = chrono::Utc::now();

    let grocery = harness
        .store
        .mark_meal_plan_grocery_list_initialized("plan-1", now)
        .await
        .unwrap_err();
    assert_eq!(grocery.kind(), ErrorKind::Conflict);

    let tasks = harness
        .store
        .mark_meal_plan_tasks_created("plan-1", now)
        .await
        .unwrap_err();
    assert_eq!(tasks.kind(), ErrorKind::Conflict);

    let missing = harness
        .store
        .mark_meal_plan_tasks_created("plan-404", now)
        .await
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    // An awaiting plan cannot be handed to the builder either
    let plan = harness.plan("plan-1").await;
    let err = harness
        .builder
        .initialize_for_plan(&plan, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let by_owner = FinalizeRequest::User {
        user_id: OWNER.to_string(),
        force: false,
    };
    harness
        .coordinator
        .attempt_finalize("plan-1", HOUSEHOLD, &by_owner, &CancellationToken::new())
        .await
        .unwrap();
    harness
        .store
        .mark_meal_plan_grocery_list_initialized("plan-1", now)
        .await
        .unwrap();
    assert!(harness.plan("plan-1").await.grocery_list_initialized);
}

#[tokio::test]
async fn test_single_item_creation_keeps_ingredient_unit_unique() {
    let harness = Harness::in_memory().await;
    seed_stew(&harness).await;
    finalized_stew_plan(&harness).await;
    let now = chrono::Utc::now();

    let input = MealPlanGroceryListItemDatabaseCreationInput {
        id: "item-1".to_string(),
        belongs_to_meal_plan: "plan-1".to_string(),
        valid_ingredient: "onion".to_string(),
        valid_measurement_unit: "grams".to_string(),
        minimum_quantity_needed: 50.0,
        maximum_quantity_needed: Some(75.0),
        status: GroceryListItemStatus::Needs,
        status_explanation: "added by hand".to_string(),
    };
    let created = harness
        .store
        .create_meal_plan_grocery_list_item(&input, now)
        .await
        .unwrap();
    assert_eq!(created.maximum_quantity_needed, Some(75.0));
    assert_eq!(created.status, GroceryListItemStatus::Needs);

    let duplicate = MealPlanGroceryListItemDatabaseCreationInput {
        id: "item-2".to_string(),
        ..input
    };
    let err = harness
        .store
        .create_meal_plan_grocery_list_item(&duplicate, now)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_hand_added_item_absorbs_computed_line() {
    let mut harness = Harness::in_memory().await;
    seed_stew(&harness).await;
    finalized_stew_plan(&harness).await;

    let hand_added = MealPlanGroceryListItemDatabaseCreationInput {
        id: "item-1".to_string(),
        belongs_to_meal_plan: "plan-1".to_string(),
        valid_ingredient: "onion".to_string(),
        valid_measurement_unit: "grams".to_string(),
        minimum_quantity_needed: 50.0,
        maximum_quantity_needed: Some(75.0),
        status: GroceryListItemStatus::Needs,
        status_explanation: "added by hand".to_string(),
    };
    harness
        .store
        .create_meal_plan_grocery_list_item(&hand_added, chrono::Utc::now())
        .await
        .unwrap();
    harness.drain_events();

    let cancel = CancellationToken::new();
    let initializer = harness.grocery_list_initializer();
    let report = initializer.run_once(&cancel).await.unwrap();
    assert_eq!(report.changed_count, 1);
    assert_eq!(report.failed_count(), 0);
    assert!(harness.plan("plan-1").await.grocery_list_initialized);

    let items = harness
        .store
        .get_meal_plan_grocery_list_items_for_meal_plan("plan-1")
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    let onion = &items[0];
    assert_eq!(onion.id, "item-1");
    assert!((onion.minimum_quantity_needed - 300.0).abs() < 1e-9);
    assert_eq!(onion.maximum_quantity_needed.map(|max| max.round()), Some(325.0));
    assert_eq!(onion.status, GroceryListItemStatus::Needs);
    assert_eq!(onion.status_explanation, "added by hand");
    assert!(onion.last_updated_at.is_some());

    let events = harness.drain_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type(), ChangeEventType::MealPlanGroceryListItemUpdated);
    assert_eq!(events[0].user_id, "system");

    let again = initializer.run_once(&cancel).await.unwrap();
    assert_eq!(again.examined, 0);
    assert!(harness.drain_events().is_empty());
}
