//! # Meal Plan Lifecycle
//!
//! Drives household meal plans from voting to a finalized plan with a
//! grocery list and prep tasks:
//! - Vote tally engine (Schulze, instant-runoff)
//! - SQLite-backed data manager ([`Store`])
//! - Finalization coordinator, grocery list builder, task generator
//! - Periodic, cancellable workers that sweep for pending work

pub mod db;
pub mod finalize;
pub mod grocery;
pub mod tally;
pub mod tasks;
pub mod workers;

pub use db::{FinalizationOutcome, FinalizeRequest, GroceryListInitialization, Store};
pub use finalize::FinalizationCoordinator;
pub use grocery::{ConversionCatalog, GroceryListBuilder};
pub use tasks::TaskGenerator;

use std::future::Future;

use mealplan_common::{Error, Result};
use tokio_util::sync::CancellationToken;

/// Run `operation` unless `cancel` fires first
///
/// A cancelled operation is dropped, which rolls back any open transaction.
pub(crate) async fn until_cancelled<T, F>(cancel: &CancellationToken, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = operation => result,
    }
}
