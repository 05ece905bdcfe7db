//! Periodic sweeps.

use crate::cleanup::cleaner::Cleaner;
use crate::shutdown::ShutdownSignal;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Runs [`Cleaner::run_once`] on a fixed period until shutdown.
#[derive(Debug)]
pub struct CleanupScheduler {
    cleaner: Cleaner,
    period: Duration,
}

impl CleanupScheduler {
    /// Scheduler sweeping every `period`.
    pub fn new(cleaner: Cleaner, period: Duration) -> Self {
        CleanupScheduler { cleaner, period }
    }

    /// Tick until `shutdown` fires. The first sweep happens one period
    /// after start; a sweep in progress completes before returning.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick is immediate.
        ticker.tick().await;

        info!(period_secs = self.period.as_secs(), "Cleanup scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(count) = self.cleaner.run_once().await {
                        debug!(count, "Scheduled cleanup finished");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Cleanup scheduler stopping");
                    break;
                }
            }
        }
    }
}
