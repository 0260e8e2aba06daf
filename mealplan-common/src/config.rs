//! Configuration loading
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments (each with a `MEALPLAN_*` environment fallback)
//! 2. TOML configuration file
//! 3. Compiled defaults
//!
//! A missing TOML file is not an error; the compiled defaults apply.

use crate::db::models::ElectionMethod;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Full service configuration as read from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub database: DatabaseConfig,
    pub events: EventsConfig,
    pub workers: WorkersConfig,
    pub meal_plans: MealPlanDefaults,
    pub logging: LoggingConfig,
}

/// Relational store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection string
    pub url: String,
    pub max_open_connections: u32,
    pub max_idle_connections: u32,
    /// SQLite busy timeout; writers wait this long for the write lock
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://mealplan.db?mode=rwc".to_string(),
            max_open_connections: 20,
            max_idle_connections: 5,
            busy_timeout_ms: 5000,
        }
    }
}

/// Change event bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Where data-change messages go: `inproc` for the in-process bus, or a
    /// `nats://` / `tls://` server URL
    pub endpoint: String,
    /// Topic name for data-change events
    pub topic: String,
    /// Buffered messages before slow subscribers start lagging
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            endpoint: "inproc".to_string(),
            topic: "data_changes".to_string(),
            capacity: 1000,
        }
    }
}

/// Parsed form of `events.endpoint`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventsEndpoint {
    InProcess,
    /// NATS server URL
    Nats(String),
}

const NATS_SCHEMES: [&str; 2] = ["nats://", "tls://"];

impl EventsConfig {
    pub fn parsed_endpoint(&self) -> Result<EventsEndpoint> {
        let endpoint = self.endpoint.trim();
        if endpoint == "inproc" {
            return Ok(EventsEndpoint::InProcess);
        }
        let has_host = NATS_SCHEMES
            .iter()
            .any(|scheme| endpoint.len() > scheme.len() && endpoint.starts_with(scheme));
        if has_host {
            return Ok(EventsEndpoint::Nats(endpoint.to_string()));
        }
        Err(Error::Config(format!(
            "Unsupported events.endpoint '{}' (expected 'inproc' or a nats:// or tls:// URL)",
            self.endpoint
        )))
    }
}

/// Worker cadences and retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub finalizer_cadence_secs: u64,
    pub grocery_list_initializer_cadence_secs: u64,
    pub task_creator_cadence_secs: u64,
    /// Attempts per operation when the store reports lock contention
    pub retry_max_attempts: u32,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            finalizer_cadence_secs: 60,
            grocery_list_initializer_cadence_secs: 300,
            task_creator_cadence_secs: 300,
            retry_max_attempts: 3,
        }
    }
}

impl WorkersConfig {
    pub fn finalizer_cadence(&self) -> Duration {
        Duration::from_secs(self.finalizer_cadence_secs)
    }

    pub fn grocery_list_initializer_cadence(&self) -> Duration {
        Duration::from_secs(self.grocery_list_initializer_cadence_secs)
    }

    pub fn task_creator_cadence(&self) -> Duration {
        Duration::from_secs(self.task_creator_cadence_secs)
    }
}

/// Defaults applied to new meal plans
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MealPlanDefaults {
    /// Used when a plan omits its election method
    pub default_election_method: ElectionMethod,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub max_open_connections: Option<u32>,
    pub max_idle_connections: Option<u32>,
    pub events_endpoint: Option<String>,
    pub events_topic: Option<String>,
    pub finalizer_cadence_secs: Option<u64>,
    pub grocery_list_initializer_cadence_secs: Option<u64>,
    pub task_creator_cadence_secs: Option<u64>,
    pub default_election_method: Option<ElectionMethod>,
    pub log_level: Option<String>,
}

impl TomlConfig {
    /// Load, apply overrides and validate
    pub fn resolve(explicit_path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let mut config = Self::load(explicit_path)?;
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Read the TOML file
    ///
    /// An explicitly requested file must exist. Without one, the platform
    /// config locations are searched and defaults are used if none exist.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = match explicit_path {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                path.to_path_buf()
            }
            None => match default_config_path() {
                Some(path) => path,
                None => {
                    warn!("No config file found, using compiled defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = std::fs::read_to_string(&path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(url) = &overrides.database_url {
            self.database.url = url.clone();
        }
        if let Some(max_open) = overrides.max_open_connections {
            self.database.max_open_connections = max_open;
        }
        if let Some(max_idle) = overrides.max_idle_connections {
            self.database.max_idle_connections = max_idle;
        }
        if let Some(endpoint) = &overrides.events_endpoint {
            self.events.endpoint = endpoint.clone();
        }
        if let Some(topic) = &overrides.events_topic {
            self.events.topic = topic.clone();
        }
        if let Some(secs) = overrides.finalizer_cadence_secs {
            self.workers.finalizer_cadence_secs = secs;
        }
        if let Some(secs) = overrides.grocery_list_initializer_cadence_secs {
            self.workers.grocery_list_initializer_cadence_secs = secs;
        }
        if let Some(secs) = overrides.task_creator_cadence_secs {
            self.workers.task_creator_cadence_secs = secs;
        }
        if let Some(method) = overrides.default_election_method {
            self.meal_plans.default_election_method = method;
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(Error::Config("database.url must not be empty".to_string()));
        }
        if self.database.max_open_connections == 0 {
            return Err(Error::Config(
                "database.max_open_connections must be positive".to_string(),
            ));
        }
        if self.database.max_idle_connections > self.database.max_open_connections {
            return Err(Error::Config(format!(
                "database.max_idle_connections ({}) exceeds max_open_connections ({})",
                self.database.max_idle_connections, self.database.max_open_connections
            )));
        }
        if self.events.capacity == 0 {
            return Err(Error::Config("events.capacity must be positive".to_string()));
        }
        if self.events.topic.is_empty() {
            return Err(Error::Config("events.topic must not be empty".to_string()));
        }
        self.events.parsed_endpoint()?;
        for (name, secs) in [
            ("finalizer_cadence_secs", self.workers.finalizer_cadence_secs),
            (
                "grocery_list_initializer_cadence_secs",
                self.workers.grocery_list_initializer_cadence_secs,
            ),
            ("task_creator_cadence_secs", self.workers.task_creator_cadence_secs),
        ] {
            if secs == 0 {
                return Err(Error::Config(format!("workers.{} must be positive", name)));
            }
        }
        if self.workers.retry_max_attempts == 0 {
            return Err(Error::Config(
                "workers.retry_max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Platform config file locations, first existing wins
fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("mealplan").join("config.toml"));
    let system_config = PathBuf::from("/etc/mealplan/config.toml");

    user_config
        .into_iter()
        .chain(std::iter::once(system_config))
        .find(|path| path.exists())
}
