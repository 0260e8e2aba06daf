//! Meal plan lifecycle worker (mealplan-lifecycle) - Main entry point
//!
//! Runs the finalization, grocery list and task sweeps against the shared
//! SQLite store, each on its own cadence, until Ctrl-C / SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use mealplan_common::config::{ConfigOverrides, EventsEndpoint, TomlConfig};
use mealplan_common::db::{init_database, ElectionMethod, RetryPolicy};
use mealplan_common::events::{ChangePublisher, DataChangeMessage, EventBus, NatsPublisher};
use mealplan_lifecycle::workers::{
    run_periodically, Finalizer, GroceryListInitializer, TaskCreator, WorkerStats,
};
use mealplan_lifecycle::{
    ConversionCatalog, FinalizationCoordinator, GroceryListBuilder, Store, TaskGenerator,
};
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Upper bound on waiting for queued change events at shutdown
const EVENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Command-line arguments for mealplan-lifecycle
#[derive(Parser, Debug)]
#[command(name = "mealplan-lifecycle")]
#[command(about = "Meal plan finalization, grocery list and task workers")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "MEALPLAN_CONFIG")]
    config: Option<PathBuf>,

    /// Database connection string
    #[arg(long, env = "MEALPLAN_DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum open database connections
    #[arg(long, env = "MEALPLAN_MAX_OPEN_CONNECTIONS")]
    max_open_connections: Option<u32>,

    /// Idle database connections kept in the pool
    #[arg(long, env = "MEALPLAN_MAX_IDLE_CONNECTIONS")]
    max_idle_connections: Option<u32>,

    /// Data-change event endpoint: `inproc` or a nats:// URL
    #[arg(long, env = "MEALPLAN_EVENTS_ENDPOINT")]
    events_endpoint: Option<String>,

    /// Data-change event topic
    #[arg(long, env = "MEALPLAN_EVENTS_TOPIC")]
    events_topic: Option<String>,

    /// Seconds between finalization sweeps
    #[arg(long, env = "MEALPLAN_FINALIZER_CADENCE_SECS")]
    finalizer_cadence_secs: Option<u64>,

    /// Seconds between grocery list sweeps
    #[arg(long, env = "MEALPLAN_GROCERY_LIST_INITIALIZER_CADENCE_SECS")]
    grocery_list_initializer_cadence_secs: Option<u64>,

    /// Seconds between task creation sweeps
    #[arg(long, env = "MEALPLAN_TASK_CREATOR_CADENCE_SECS")]
    task_creator_cadence_secs: Option<u64>,

    /// Election method for plans that omit one (schulze, instant_runoff)
    #[arg(long, env = "MEALPLAN_DEFAULT_ELECTION_METHOD", value_parser = parse_election_method)]
    default_election_method: Option<ElectionMethod>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "MEALPLAN_LOG_LEVEL")]
    log_level: Option<String>,

    /// Run every sweep once and exit
    #[arg(long)]
    once: bool,

    /// Print the resolved configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            database_url: self.database_url.clone(),
            max_open_connections: self.max_open_connections,
            max_idle_connections: self.max_idle_connections,
            events_endpoint: self.events_endpoint.clone(),
            events_topic: self.events_topic.clone(),
            finalizer_cadence_secs: self.finalizer_cadence_secs,
            grocery_list_initializer_cadence_secs: self.grocery_list_initializer_cadence_secs,
            task_creator_cadence_secs: self.task_creator_cadence_secs,
            default_election_method: self.default_election_method,
            log_level: self.log_level.clone(),
        }
    }
}

fn parse_election_method(value: &str) -> std::result::Result<ElectionMethod, String> {
    ElectionMethod::from_str(value)
        .ok_or_else(|| format!("unknown election method '{}' (schulze, instant_runoff)", value))
}

/// The three sweeps sharing one store and bus
struct Workers {
    finalizer: Arc<Finalizer>,
    grocery_list_initializer: Arc<GroceryListInitializer>,
    task_creator: Arc<TaskCreator>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = TomlConfig::resolve(args.config.as_deref(), &args.overrides())
        .context("Failed to load configuration")?;

    if args.print_config {
        print!("{}", toml::to_string(&config).context("Failed to render configuration")?);
        return Ok(());
    }

    // Initialize tracing; RUST_LOG wins over the configured level
    let level = config.logging.level.as_str();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("mealplan_lifecycle={level},mealplan_common={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting meal plan lifecycle workers");
    info!(
        database_url = %config.database.url,
        events_endpoint = %config.events.endpoint,
        topic = %config.events.topic,
        default_election_method = %config.meal_plans.default_election_method,
        "Configuration resolved"
    );

    let pool = init_database(&config.database)
        .await
        .context("Failed to initialize database")?;
    let store = Store::new(pool.clone());

    let cancel = CancellationToken::new();
    let (publisher, event_task) = start_event_publisher(&config, &cancel).await?;
    let retry = RetryPolicy::with_max_attempts(config.workers.retry_max_attempts);

    let coordinator = Arc::new(FinalizationCoordinator::new(
        store.clone(),
        Arc::clone(&publisher),
        retry,
    ));
    let catalog = Arc::new(ConversionCatalog::new(store.clone()));
    let builder = Arc::new(GroceryListBuilder::new(
        store.clone(),
        catalog,
        Arc::clone(&publisher),
        retry,
    ));
    let generator = Arc::new(TaskGenerator::new(store, publisher, retry));

    let workers = Workers {
        finalizer: Arc::new(Finalizer::new(coordinator, retry)),
        grocery_list_initializer: Arc::new(GroceryListInitializer::new(builder, retry)),
        task_creator: Arc::new(TaskCreator::new(generator, retry)),
    };

    let result = if args.once {
        run_once(&workers, &cancel).await
    } else {
        run_until_shutdown(&workers, &config, &cancel).await
    };

    // Dropping the last publisher handle lets the broker forwarder drain
    cancel.cancel();
    drop(workers);
    match tokio::time::timeout(EVENT_DRAIN_TIMEOUT, event_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Event publisher task ended abnormally"),
        Err(_) => warn!("Timed out draining data change events"),
    }
    pool.close().await;

    match &result {
        Ok(()) => info!("Shutdown complete"),
        Err(e) => error!(error = %e, "Exiting after fatal error"),
    }
    result
}

/// One sweep of each worker, in lifecycle order
async fn run_once(workers: &Workers, cancel: &CancellationToken) -> Result<()> {
    let finalized = workers
        .finalizer
        .run_once(cancel)
        .await
        .context("Finalization sweep failed")?;
    let groceries = workers
        .grocery_list_initializer
        .run_once(cancel)
        .await
        .context("Grocery list sweep failed")?;
    let tasks = workers
        .task_creator
        .run_once(cancel)
        .await
        .context("Task creation sweep failed")?;

    info!(
        finalized = finalized.changed_count,
        grocery_lists = groceries.changed_count,
        task_sets = tasks.changed_count,
        failed_count = finalized.failed_count() + groceries.failed_count() + tasks.failed_count(),
        "Single pass complete"
    );
    Ok(())
}

/// Run every worker on its cadence until a shutdown signal or a fatal worker error
async fn run_until_shutdown(
    workers: &Workers,
    config: &TomlConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let finalizer_stats = Arc::new(WorkerStats::default());
    let grocery_stats = Arc::new(WorkerStats::default());
    let task_stats = Arc::new(WorkerStats::default());

    let mut set = JoinSet::new();

    {
        let worker = Arc::clone(&workers.finalizer);
        let token = cancel.clone();
        let stats = Arc::clone(&finalizer_stats);
        let cadence = config.workers.finalizer_cadence();
        set.spawn(async move {
            let sweep_token = token.clone();
            let result = run_periodically(Finalizer::NAME, cadence, token, stats, move || {
                let worker = Arc::clone(&worker);
                let token = sweep_token.clone();
                async move { worker.run_once(&token).await }
            })
            .await;
            (Finalizer::NAME, result)
        });
    }

    {
        let worker = Arc::clone(&workers.grocery_list_initializer);
        let token = cancel.clone();
        let stats = Arc::clone(&grocery_stats);
        let cadence = config.workers.grocery_list_initializer_cadence();
        set.spawn(async move {
            let sweep_token = token.clone();
            let result =
                run_periodically(GroceryListInitializer::NAME, cadence, token, stats, move || {
                    let worker = Arc::clone(&worker);
                    let token = sweep_token.clone();
                    async move { worker.run_once(&token).await }
                })
                .await;
            (GroceryListInitializer::NAME, result)
        });
    }

    {
        let worker = Arc::clone(&workers.task_creator);
        let token = cancel.clone();
        let stats = Arc::clone(&task_stats);
        let cadence = config.workers.task_creator_cadence();
        set.spawn(async move {
            let sweep_token = token.clone();
            let result = run_periodically(TaskCreator::NAME, cadence, token, stats, move || {
                let worker = Arc::clone(&worker);
                let token = sweep_token.clone();
                async move { worker.run_once(&token).await }
            })
            .await;
            (TaskCreator::NAME, result)
        });
    }

    let mut failure: Option<anyhow::Error> = None;

    tokio::select! {
        _ = shutdown_signal() => {}
        Some(joined) = set.join_next() => {
            failure = worker_failure(joined);
            if failure.is_none() {
                warn!("A worker stopped before shutdown was requested");
            }
        }
    }

    // Let in-flight sweeps drain
    cancel.cancel();
    while let Some(joined) = set.join_next().await {
        if let Some(e) = worker_failure(joined) {
            failure.get_or_insert(e);
        }
    }

    for (name, stats) in [
        (Finalizer::NAME, &finalizer_stats),
        (GroceryListInitializer::NAME, &grocery_stats),
        (TaskCreator::NAME, &task_stats),
    ] {
        let snapshot = stats.snapshot();
        info!(
            worker = name,
            iterations = snapshot.iterations,
            changed = snapshot.changed,
            failed = snapshot.failed,
            "Worker totals"
        );
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn worker_failure(
    joined: std::result::Result<(&'static str, mealplan_common::Result<()>), tokio::task::JoinError>,
) -> Option<anyhow::Error> {
    match joined {
        Ok((_, Ok(()))) => None,
        Ok((name, Err(e))) => Some(anyhow!(e).context(format!("Worker {} failed", name))),
        Err(e) => Some(anyhow!(e).context("Worker task panicked")),
    }
}

/// Publisher selected by `events.endpoint`, plus the task that serves it
///
/// `inproc` gets the broadcast bus with a debug logger subscribed before any
/// sweep publishes; a NATS URL gets the broker publisher and its forwarder.
async fn start_event_publisher(
    config: &TomlConfig,
    cancel: &CancellationToken,
) -> Result<(Arc<dyn ChangePublisher>, JoinHandle<()>)> {
    match config.events.parsed_endpoint()? {
        EventsEndpoint::InProcess => {
            let bus = EventBus::new(config.events.topic.clone(), config.events.capacity);
            let logger = tokio::spawn(log_change_events(bus.subscribe(), cancel.clone()));
            info!(topic = bus.topic(), "Publishing data change events in process");
            let publisher: Arc<dyn ChangePublisher> = Arc::new(bus);
            Ok((publisher, logger))
        }
        EventsEndpoint::Nats(url) => {
            let (nats, forwarder) =
                NatsPublisher::connect(&url, &config.events.topic, config.events.capacity)
                    .await
                    .context("Failed to connect to event broker")?;
            info!(subject = nats.subject(), "Publishing data change events to NATS");
            let publisher: Arc<dyn ChangePublisher> = Arc::new(nats);
            Ok((publisher, forwarder))
        }
    }
}

/// Log every data-change message at debug level until cancelled
async fn log_change_events(mut rx: broadcast::Receiver<DataChangeMessage>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(message) => match message.to_json() {
                    Ok(json) => debug!(event_type = message.event_type().as_str(), %json, "Data change"),
                    Err(e) => warn!(error = %e, "Failed to serialize data change message"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged behind data change bus");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
