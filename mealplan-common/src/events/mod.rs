//! Change events for the meal-plan lifecycle
//!
//! Every successful mutation publishes one [`DataChangeMessage`] after its
//! transaction commits. Downstream consumers (search indexing,
//! notifications) receive messages at least once and must be idempotent.
//!
//! Publishing is best-effort: a failed publish is logged and never rolls back
//! committed state, so consumers must be reconcilable from the store.

mod nats;
mod types;

pub use nats::NatsPublisher;
pub use types::{ChangeEventType, ChosenOptionSummary};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::db::models::{MealPlanGroceryListItem, MealPlanTask, MealPlanTaskStatus};
use crate::{Error, Result};

/// User id stamped on messages caused by background workers
pub const SYSTEM_USER_ID: &str = "system";

/// Event-specific payload, tagged by `event_type` in the serialized document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ChangePayload {
    /// Plan moved from awaiting_votes to finalized
    MealPlanFinalized {
        /// One entry per event, in event order
        chosen_options: Vec<ChosenOptionSummary>,
    },

    /// Grocery list initialization created an item
    MealPlanGroceryListItemCreated {
        grocery_list_item: MealPlanGroceryListItem,
    },

    /// A grocery list item was patched (status, purchase details)
    MealPlanGroceryListItemUpdated {
        grocery_list_item: MealPlanGroceryListItem,
    },

    /// Task generation created a prep task
    MealPlanTaskCreated { meal_plan_task: MealPlanTask },

    /// A prep task moved to a new status
    MealPlanTaskStatusChanged {
        meal_plan_task: MealPlanTask,
        previous_status: MealPlanTaskStatus,
    },
}

/// Change-event envelope
///
/// Serialized as a flat key/value document:
///
/// ```json
/// {"user_id":"system","household_id":"h1","meal_plan_id":"p1",
///  "timestamp":"...","event_type":"meal_plan_finalized","chosen_options":[...]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChangeMessage {
    /// User who caused the change, or [`SYSTEM_USER_ID`]
    pub user_id: String,
    pub household_id: String,
    pub meal_plan_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: ChangePayload,
}

impl DataChangeMessage {
    pub fn new(
        user_id: impl Into<String>,
        household_id: impl Into<String>,
        meal_plan_id: impl Into<String>,
        payload: ChangePayload,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            household_id: household_id.into(),
            meal_plan_id: meal_plan_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn event_type(&self) -> ChangeEventType {
        match &self.payload {
            ChangePayload::MealPlanFinalized { .. } => ChangeEventType::MealPlanFinalized,
            ChangePayload::MealPlanGroceryListItemCreated { .. } => {
                ChangeEventType::MealPlanGroceryListItemCreated
            }
            ChangePayload::MealPlanGroceryListItemUpdated { .. } => {
                ChangeEventType::MealPlanGroceryListItemUpdated
            }
            ChangePayload::MealPlanTaskCreated { .. } => ChangeEventType::MealPlanTaskCreated,
            ChangePayload::MealPlanTaskStatusChanged { .. } => {
                ChangeEventType::MealPlanTaskStatusChanged
            }
        }
    }

    /// Serialize to the wire document
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Append-only, thread-safe sink for change messages
pub trait ChangePublisher: Send + Sync {
    fn publish(&self, message: DataChangeMessage) -> Result<()>;
}

/// Publish after commit; failures are logged for reconciliation, never propagated
///
/// Returns whether the message was handed to the bus.
pub fn publish_best_effort(publisher: &dyn ChangePublisher, message: DataChangeMessage) -> bool {
    let event_type = message.event_type();
    let meal_plan_id = message.meal_plan_id.clone();

    match publisher.publish(message) {
        Ok(()) => {
            tracing::debug!(
                event_type = event_type.as_str(),
                meal_plan_id = %meal_plan_id,
                "Published data change event"
            );
            true
        }
        Err(e) => {
            tracing::warn!(
                event_type = event_type.as_str(),
                meal_plan_id = %meal_plan_id,
                error = %e,
                "Failed to publish data change event; state is committed, event needs reconciliation"
            );
            false
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// In-process data-change bus
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use mealplan_common::events::{ChangePayload, ChangePublisher, DataChangeMessage, EventBus};
///
/// let bus = EventBus::new("data_changes", 100);
/// let mut rx = bus.subscribe();
///
/// bus.publish(DataChangeMessage::new(
///     "system",
///     "household-1",
///     "plan-1",
///     ChangePayload::MealPlanFinalized { chosen_options: vec![] },
/// ))
/// .unwrap();
///
/// assert_eq!(rx.try_recv().unwrap().meal_plan_id, "plan-1");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DataChangeMessage>,
    topic: String,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus for `topic` with specified channel capacity
    pub fn new(topic: impl Into<String>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            topic: topic.into(),
            capacity,
        }
    }

    /// Subscribe to all future messages
    ///
    /// Messages published before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<DataChangeMessage> {
        self.tx.subscribe()
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl ChangePublisher for EventBus {
    /// Fails when no subscriber is listening on the topic
    fn publish(&self, message: DataChangeMessage) -> Result<()> {
        self.tx
            .send(message)
            .map(|_| ())
            .map_err(|_| Error::Publish(format!("no subscribers on topic '{}'", self.topic)))
    }
}
