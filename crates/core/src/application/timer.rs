// Schedule Runner - the firing loop that drives the Dispatcher
//
// Computes the next fire instant across all tenant cron schedules, sleeps
// until it, and invokes the dispatcher with a firing deadline. Co-firing
// tenants sharing a schedule name arrive as one fan-out firing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::application::dispatcher::Dispatcher;
use crate::application::registry::{FiringContext, TenantRegistry};
use crate::domain::{ScheduleName, ScheduleTimezone, TenantId};
use crate::error::Result;

/// Shutdown signal for graceful termination
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for shutdown signal
    pub async fn wait(&mut self) {
        let _ = self.rx.changed().await;
    }
}

/// Shutdown sender
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Signal shutdown to the runner
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Create a shutdown channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}

/// Runner tuning knobs
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Timezone the cron expressions are evaluated in
    pub timezone: ScheduleTimezone,
    /// Budget for one whole firing; reached mid-dispatch, in-flight ticks
    /// are abandoned and released
    pub firing_deadline: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            timezone: ScheduleTimezone::Utc,
            firing_deadline: Duration::from_secs(60),
        }
    }
}

/// One upcoming firing: the instant plus the schedule groups due at it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpcomingFiring {
    pub fire_at: DateTime<Utc>,
    pub groups: BTreeMap<ScheduleName, Vec<TenantId>>,
}

pub struct ScheduleRunner {
    registry: Arc<TenantRegistry>,
    dispatcher: Arc<Dispatcher>,
    settings: RunnerSettings,
}

impl ScheduleRunner {
    pub fn new(
        registry: Arc<TenantRegistry>,
        dispatcher: Arc<Dispatcher>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            settings,
        }
    }

    /// Run the firing loop with graceful shutdown support
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(
            tenants = self.registry.tenants().len(),
            timezone = ?self.settings.timezone,
            "Schedule runner started"
        );

        loop {
            if shutdown.is_shutdown() {
                break;
            }

            let now = Utc::now();
            let Some(firing) = self.next_firing(now) else {
                warn!("No tenant schedule will ever fire again; runner stopping");
                break;
            };

            let wait = (firing.fire_at - now)
                .to_std()
                .unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = sleep(wait) => {}
                _ = shutdown.wait() => {
                    info!("Schedule runner interrupted while waiting");
                    break;
                }
            }

            let deadline = Instant::now() + self.settings.firing_deadline;
            for (schedule, tags) in firing.groups {
                let ctx = FiringContext {
                    schedule,
                    fired_at: firing.fire_at,
                    tenant_tags: Some(tags),
                };
                let records = self.dispatcher.dispatch_firing(&ctx, Some(deadline)).await;
                info!(
                    schedule = %ctx.schedule,
                    fired_at = %ctx.fired_at,
                    outcomes = records.len(),
                    "Firing dispatched"
                );
            }
        }

        info!("Schedule runner stopped");
        Ok(())
    }

    /// Earliest upcoming fire time strictly after `after`, with every tenant
    /// due at that instant grouped under its schedule name
    pub fn next_firing(&self, after: DateTime<Utc>) -> Option<UpcomingFiring> {
        let tz = self.settings.timezone;

        let fires: Vec<(DateTime<Utc>, &crate::domain::Tenant)> = self
            .registry
            .tenants()
            .iter()
            .filter_map(|t| t.next_fire(tz, after).map(|at| (at, t)))
            .collect();

        let fire_at = fires.iter().map(|(at, _)| *at).min()?;

        let mut groups: BTreeMap<ScheduleName, Vec<TenantId>> = BTreeMap::new();
        for (at, tenant) in fires {
            if at == fire_at {
                groups
                    .entry(tenant.schedule_name().to_string())
                    .or_default()
                    .push(tenant.id.clone());
            }
        }

        Some(UpcomingFiring { fire_at, groups })
    }
}
