// Maintenance Service
// Periodic cleanup of expired messages and stale guard entries

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info};

use crate::error::Result;
use crate::port::{Maintenance, MaintenanceConfig};

/// Runs periodic store maintenance in the background.
///
/// The guard's dedup horizon is enforced here for shared-store guards:
/// entries older than the horizon can never dedupe a live firing again and
/// only grow the store.
pub struct MaintenanceScheduler {
    maintenance: Arc<dyn Maintenance>,
    config: MaintenanceConfig,
}

impl MaintenanceScheduler {
    pub fn new(maintenance: Arc<dyn Maintenance>, config: MaintenanceConfig) -> Self {
        Self {
            maintenance,
            config,
        }
    }

    /// Run maintenance loop (background task)
    ///
    /// Should be spawned in tokio::spawn
    pub async fn run(self) {
        info!(
            interval_hours = self.config.interval_hours,
            guard_horizon_hours = self.config.guard_horizon_hours,
            "Maintenance scheduler started"
        );

        let mut tick = interval(Duration::from_secs(self.config.interval_hours * 3600));

        loop {
            tick.tick().await;

            if let Err(e) = self.run_now().await {
                error!(error = ?e, "Scheduled maintenance failed");
            }
        }
    }

    /// Run one maintenance sweep immediately
    pub async fn run_now(&self) -> Result<()> {
        let expired = self.maintenance.purge_expired_messages().await?;
        let stale = self
            .maintenance
            .purge_stale_guard_entries(self.config.guard_horizon_hours)
            .await?;
        self.maintenance.vacuum().await?;

        info!(
            expired_messages = expired,
            stale_guard_entries = stale,
            "Maintenance sweep completed"
        );

        Ok(())
    }
}
