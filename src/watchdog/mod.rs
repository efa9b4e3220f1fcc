//! Watchdog module: probes every configured upstream on a fixed
//! interval, records health history, and notifies on transitions.

mod notify;
mod probe;
mod retention;
mod settings;
mod targets;

pub use notify::*;
pub use probe::*;
pub use retention::*;
pub use settings::*;
pub use targets::*;

use std::sync::Arc;
use std::time::Duration;

use crate::db::Store;

/// Delay before the first cycle, so the hosting process finishes
/// booting before probe load starts.
const BOOT_DELAY: Duration = Duration::from_secs(5);

/// The watchdog scheduler.
///
/// One background task drives all cycles. The cycle runs inline in the
/// ticker loop and missed ticks are skipped, so at most one cycle is
/// ever in flight.
pub struct Watchdog {
    store: Arc<Store>,
    dispatcher: WebhookDispatcher,
}

impl Watchdog {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            dispatcher: WebhookDispatcher::new(),
        }
    }

    /// Start the watchdog background task.
    ///
    /// The cycle interval is snapshotted from settings once, after the
    /// boot delay; changing `watchdog_interval_ms` takes effect on the
    /// next process start.
    pub fn start(self: Arc<Self>) {
        tokio::spawn(async move {
            tokio::time::sleep(BOOT_DELAY).await;

            let interval = match WatchdogSettings::load(&self.store) {
                Ok(s) => s.interval,
                Err(e) => {
                    tracing::error!("Watchdog: failed to load settings, using defaults: {}", e);
                    WatchdogSettings::default().interval
                }
            };

            tracing::info!("Watchdog started, cycle interval {:?}", interval);

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                self.run_cycle().await;
            }
        });
    }

    /// Run one full cycle: enumerate, probe each target serially, then
    /// prune. Failures in one step never stop the others, and nothing
    /// here ever terminates the scheduler loop.
    pub async fn run_cycle(&self) {
        match enumerate(&self.store) {
            Ok(targets) => {
                tracing::debug!("Watchdog cycle: {} targets", targets.len());

                for target in &targets {
                    match process_target(&self.store, target, DEFAULT_PROBE_TIMEOUT).await {
                        Ok(Some(dispatch)) => {
                            self.dispatcher.send(&dispatch.url, &dispatch.payload).await;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::error!(
                                "Watchdog cycle: {} upstream {} failed: {}",
                                target.entity_label,
                                target.upstream_key(),
                                e
                            );
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!("Watchdog cycle: target enumeration failed: {}", e);
            }
        }

        // Pruning runs even when enumeration or individual targets failed
        let retention_days = match WatchdogSettings::load(&self.store) {
            Ok(s) => s.retention_days,
            Err(e) => {
                tracing::error!("Watchdog cycle: failed to load settings: {}", e);
                DEFAULT_RETENTION_DAYS
            }
        };
        prune_history(&self.store, retention_days);
    }
}
