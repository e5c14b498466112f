//! Engine configuration, loaded once at startup from a JSON file.
//!
//! Tenants are immutable for the life of the process; changing the registry
//! requires a restart.

use anyhow::{Context, Result};
use serde::Deserialize;

use polldispatch_core::domain::{ScheduleTimezone, TenantSpec};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    /// Default destination for poll-trigger messages
    pub trigger_queue: String,
    /// Destination for failed dispatch envelopes
    pub dead_letter_queue: String,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            trigger_queue: "polling-trigger".to_string(),
            dead_letter_queue: "polling-trigger-dlq".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    /// Total enqueue attempts before dead-lettering
    pub max_attempts: u32,
    /// Delay before the first enqueue retry
    pub retry_base_delay_ms: i64,
    /// Backoff multiplier per attempt
    pub backoff_factor: f64,
    /// Per-call timeout on guard/enqueue/dead-letter I/O
    pub op_timeout_secs: u64,
    /// Parallel per-tenant dispatches per firing
    pub max_concurrent: usize,
    /// Budget for one whole firing
    pub firing_deadline_secs: u64,
    /// Timezone the cron expressions are evaluated in
    pub timezone: ScheduleTimezone,
    /// Guard dedup horizon; entries older than this are purgeable
    pub guard_horizon_hours: i64,
    /// How often the maintenance sweep runs
    pub maintenance_interval_hours: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            backoff_factor: 2.0,
            op_timeout_secs: 5,
            max_concurrent: 4,
            firing_deadline_secs: 60,
            timezone: ScheduleTimezone::Utc,
            guard_horizon_hours: 24,
            maintenance_interval_hours: 6,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    pub tenants: Vec<TenantSpec>,
}

impl EngineConfig {
    pub fn load(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: EngineConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        if config.tenants.is_empty() {
            anyhow::bail!("Config must register at least one tenant: {}", path);
        }

        Ok(config)
    }
}
