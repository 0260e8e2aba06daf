//! Cancellable periodic driver for worker sweeps

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mealplan_common::{Error, ErrorKind, Result};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{SweepReport, WorkerStats};

/// Run `sweep` every `cadence` until `cancel` fires
///
/// The first sweep starts immediately. A sweep in progress when shutdown is
/// requested is allowed to drain. Ticks missed by a long sweep are skipped.
/// Non-fatal sweep errors are logged and the loop continues; a fatal error
/// ends the loop and is returned.
pub async fn run_periodically<F, Fut>(
    name: &'static str,
    cadence: Duration,
    cancel: CancellationToken,
    stats: Arc<WorkerStats>,
    mut sweep: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<SweepReport>>,
{
    info!(worker = name, cadence_secs = cadence.as_secs(), "Worker started");

    let mut timer = interval(cadence);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = timer.tick() => {}
        }

        match sweep().await {
            Ok(report) => {
                stats.record(&report);
                debug!(
                    worker = name,
                    examined = report.examined,
                    changed_count = report.changed_count,
                    failed_count = report.failed_count(),
                    "Sweep finished"
                );
            }
            Err(Error::Cancelled) => break,
            Err(e) if e.kind() == ErrorKind::Fatal => {
                error!(worker = name, error = %e, "Worker stopping on fatal error");
                return Err(e);
            }
            Err(e) => {
                warn!(worker = name, error = %e, "Sweep failed, will retry next tick");
            }
        }
    }

    info!(worker = name, "Worker stopped");
    Ok(())
}
