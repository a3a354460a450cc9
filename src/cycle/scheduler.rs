use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{AppContext, CycleError};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "crowdwatch::scheduler";

use crate::{log_error, log_info, log_warn};

/// Runs a cycle every `interval` until `cancel` fires.
///
/// Ticks that land while a server-triggered cycle is running are skipped.
/// Each cycle is bounded by `cycle_timeout`.
pub async fn run_scheduler(
    ctx: AppContext,
    interval: Duration,
    cycle_timeout: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    log_info!("Scheduler running every {}s", interval.as_secs());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match tokio::time::timeout(cycle_timeout, ctx.run_cycle()).await {
                    Ok(Ok(summary)) => log_info!(
                        "scheduled cycle {} stored {} reading(s)",
                        summary.cycle_id,
                        summary.readings_stored
                    ),
                    Ok(Err(CycleError::Busy)) => log_warn!("scheduled cycle skipped, another cycle is running"),
                    Ok(Err(err)) => log_error!("scheduled cycle failed: {err}"),
                    Err(_) => log_warn!("scheduled cycle timeout (> {}s)", cycle_timeout.as_secs()),
                }
            }
            _ = cancel.cancelled() => {
                log_info!("scheduler shutting down");
                break;
            }
        }
    }
}
