//! Background maintenance of recorded operations

mod sweeper;

pub use sweeper::SweepReport;

use crate::config::SchedulerConfig;
use crate::storage::Store;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};

/// Scheduler state
pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn Store>,
    running: Arc<RwLock<bool>>,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(config: SchedulerConfig, store: Arc<dyn Store>) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            running: Arc::new(RwLock::new(false)),
        })
    }

    /// Run the sweep loop until [`Scheduler::stop`] is called
    pub async fn start(self: Arc<Self>) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        tracing::info!(
            interval_secs = self.config.sweep_interval_secs,
            "Scheduler started"
        );

        let mut interval = interval(Duration::from_secs(self.config.sweep_interval_secs.max(1)));
        loop {
            interval.tick().await;

            let running = self.running.read().await;
            if !*running {
                break;
            }
            drop(running);

            match self.sweep().await {
                Ok(report) if !report.is_empty() => {
                    tracing::info!(
                        expired = report.expired,
                        pruned = report.pruned,
                        "Operation sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Operation sweep failed"),
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// Stop the scheduler
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }
}
