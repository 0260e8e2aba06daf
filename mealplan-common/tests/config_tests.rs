//! Integration tests for configuration loading
//!
//! Covers:
//! - Missing TOML files fall back to compiled defaults
//! - Platform config location discovery (XDG_CONFIG_HOME)
//! - Priority order: overrides > TOML > defaults
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate XDG_CONFIG_HOME are marked with #[serial].

use mealplan_common::config::{ConfigOverrides, TomlConfig};
use mealplan_common::db::ElectionMethod;
use mealplan_common::Error;
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

fn write_user_config(dir: &TempDir, content: &str) {
    let config_dir = dir.path().join("mealplan");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(config_dir.join("config.toml"), content).unwrap();
}

#[test]
#[serial]
fn test_missing_config_uses_defaults() {
    let empty = TempDir::new().unwrap();
    env::set_var("XDG_CONFIG_HOME", empty.path());

    let config = TomlConfig::load(None).unwrap();

    env::remove_var("XDG_CONFIG_HOME");

    // /etc/mealplan/config.toml is not expected on a test machine
    if !std::path::Path::new("/etc/mealplan/config.toml").exists() {
        assert_eq!(config.database.url, "sqlite://mealplan.db?mode=rwc");
        assert_eq!(config.events.endpoint, "inproc");
    }
}

#[test]
#[serial]
fn test_user_config_location_is_discovered() {
    let dir = TempDir::new().unwrap();
    write_user_config(
        &dir,
        r#"
        [database]
        url = "sqlite://discovered.db"
        max_open_connections = 4
        max_idle_connections = 2
        "#,
    );
    env::set_var("XDG_CONFIG_HOME", dir.path());

    let config = TomlConfig::load(None).unwrap();

    env::remove_var("XDG_CONFIG_HOME");

    assert_eq!(config.database.url, "sqlite://discovered.db");
    assert_eq!(config.database.max_open_connections, 4);
    assert_eq!(config.database.max_idle_connections, 2);
}

#[test]
fn test_explicit_missing_path_is_an_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");

    let result = TomlConfig::load(Some(&missing));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_resolve_priority_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("lifecycle.toml");
    fs::write(
        &path,
        r#"
        [workers]
        finalizer_cadence_secs = 30
        task_creator_cadence_secs = 120

        [meal_plans]
        default_election_method = "instant_runoff"

        [logging]
        level = "debug"
        "#,
    )
    .unwrap();

    let overrides = ConfigOverrides {
        finalizer_cadence_secs: Some(5),
        default_election_method: Some(ElectionMethod::Schulze),
        ..Default::default()
    };

    let config = TomlConfig::resolve(Some(&path), &overrides).unwrap();

    // Overrides beat the file
    assert_eq!(config.workers.finalizer_cadence_secs, 5);
    assert_eq!(
        config.meal_plans.default_election_method,
        ElectionMethod::Schulze
    );
    // File beats defaults
    assert_eq!(config.workers.task_creator_cadence_secs, 120);
    assert_eq!(config.logging.level, "debug");
    // Defaults fill the rest
    assert_eq!(config.workers.grocery_list_initializer_cadence_secs, 300);
}

#[test]
fn test_resolve_rejects_invalid_configuration() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[events]\nendpoint = \"kafka://localhost:9092\"\n").unwrap();

    let result = TomlConfig::resolve(Some(&path), &ConfigOverrides::default());
    let err = result.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(err.kind(), mealplan_common::ErrorKind::Fatal);
}
