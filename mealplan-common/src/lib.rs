//! # Meal Plan Common Library
//!
//! Shared code for the meal-plan lifecycle services including:
//! - Entity models for plans, votes, tasks, grocery items and recipes
//! - Database schema initialization and transient-error retry
//! - Change event envelope (DataChangeMessage), in-process EventBus and NATS publisher
//! - Configuration loading
//! - Timestamp utilities

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, ErrorKind, Result};
