//! Background jobs - health probe and eviction sweeps.

mod scheduler;

pub use scheduler::{Scheduler, SchedulerConfig};

use std::time::Duration;

use verge_core::limiter::epoch_ms;

use crate::state::AppState;

const FALLBACK_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const METRICS_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Register and start the periodic jobs. Returns the scheduler handle so
/// the caller can keep it alive for the process lifetime.
pub async fn start_jobs(state: &AppState) -> Option<Scheduler> {
    let config = SchedulerConfig::from_env();
    if !config.enabled {
        tracing::info!("Scheduler disabled");
        return None;
    }

    let scheduler = match Scheduler::new().await {
        Ok(scheduler) => scheduler,
        Err(err) => {
            tracing::error!(%err, "Failed to create scheduler; probe and sweeps will not run");
            return None;
        }
    };

    // Reachability probe - the only path back to distributed routing.
    let manager = state.manager.clone();
    let probe = scheduler
        .add_repeated(manager.probe_interval(), move || {
            let manager = manager.clone();
            async move {
                manager.probe().await;
            }
        })
        .await;
    if let Err(err) = probe {
        tracing::error!(%err, "Failed to register health probe job");
    }

    // Fallback counter sweep: expired identifiers and the size bound.
    if let Some(fallback) = state.fallback.clone() {
        let sweep = scheduler
            .add_repeated(FALLBACK_SWEEP_INTERVAL, move || {
                let fallback = fallback.clone();
                async move {
                    let removed = fallback.sweep(epoch_ms()).await;
                    if removed > 0 {
                        tracing::debug!(removed, "Fallback sweep removed identifiers");
                    }
                }
            })
            .await;
        if let Err(err) = sweep {
            tracing::error!(%err, "Failed to register fallback sweep job");
        }
    }

    // Metrics retention sweep.
    let metrics = state.metrics.clone();
    let sweep = scheduler
        .add_repeated(METRICS_SWEEP_INTERVAL, move || {
            let metrics = metrics.clone();
            async move {
                let dropped = metrics.sweep(epoch_ms());
                if dropped > 0 {
                    tracing::debug!(dropped, "Metrics sweep evicted aged records");
                }
            }
        })
        .await;
    if let Err(err) = sweep {
        tracing::error!(%err, "Failed to register metrics sweep job");
    }

    if let Err(err) = scheduler.start().await {
        tracing::error!(%err, "Failed to start scheduler");
        return None;
    }

    Some(scheduler)
}
