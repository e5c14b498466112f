// Tenant Domain Model

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};
use crate::domain::message::MessageTtl;

/// Tenant identity (unique string key, e.g. "cadph", "ladph")
pub type TenantId = String;

/// Queue target name
pub type QueueName = String;

/// Named schedule identifier (what the firing runtime reports as "which timer fired")
pub type ScheduleName = String;

/// How a tenant is bound to a physical schedule firing.
///
/// `Dedicated` means the tenant owns its own timer and the schedule name is the
/// tenant id. `Shared` means several tenants ride one named firing and the
/// dispatcher fans out over all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantBinding {
    Dedicated,
    Shared(ScheduleName),
}

/// Timezone the cron expressions are evaluated in.
///
/// Explicit by design: the evaluation timezone is configuration, not a hidden
/// default. DST behavior follows the chrono implementation of the chosen zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleTimezone {
    #[default]
    Utc,
    Local,
}

/// Tenant configuration entry as it appears in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSpec {
    pub id: String,
    /// Standard 5- or 6-field cron expression
    pub cron: String,
    /// Shared schedule name; absent means a dedicated schedule per tenant
    #[serde(default)]
    pub schedule: Option<String>,
    /// Destination queue override; absent means the engine's trigger queue
    #[serde(default)]
    pub queue: Option<String>,
    /// TTL override in seconds; absent means the message never expires
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

/// Registered tenant. Immutable for the life of the process.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub id: TenantId,
    pub schedule: Schedule,
    pub cron_expr: String,
    pub binding: TenantBinding,
    pub queue: Option<QueueName>,
    pub ttl: MessageTtl,
}

impl Tenant {
    /// Build a tenant from its config entry, validating the cron expression.
    pub fn from_spec(spec: &TenantSpec) -> Result<Self> {
        if spec.id.trim().is_empty() {
            return Err(DomainError::Validation("tenant id must not be empty".into()));
        }

        let normalized = normalize_cron(&spec.cron);
        let schedule =
            Schedule::from_str(&normalized).map_err(|e| DomainError::InvalidSchedule {
                tenant: spec.id.clone(),
                expr: spec.cron.clone(),
                reason: e.to_string(),
            })?;

        // A schedule that never fires again is a misconfiguration
        if schedule.upcoming(Utc).next().is_none() {
            return Err(DomainError::InvalidSchedule {
                tenant: spec.id.clone(),
                expr: spec.cron.clone(),
                reason: "no future fire time".to_string(),
            });
        }

        Ok(Self {
            id: spec.id.clone(),
            schedule,
            cron_expr: spec.cron.clone(),
            binding: match &spec.schedule {
                Some(name) => TenantBinding::Shared(name.clone()),
                None => TenantBinding::Dedicated,
            },
            queue: spec.queue.clone(),
            ttl: MessageTtl::from_seconds(spec.ttl_seconds),
        })
    }

    /// Name of the schedule firing this tenant is bound to
    pub fn schedule_name(&self) -> &str {
        match &self.binding {
            TenantBinding::Dedicated => &self.id,
            TenantBinding::Shared(name) => name,
        }
    }

    /// Next fire time strictly after `after`, in UTC
    pub fn next_fire(&self, tz: ScheduleTimezone, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match tz {
            ScheduleTimezone::Utc => self.schedule.after(&after).next(),
            ScheduleTimezone::Local => self
                .schedule
                .after(&after.with_timezone(&chrono::Local))
                .next()
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

/// The cron crate wants a seconds field; operators write standard 5-field
/// expressions. Normalize by pinning seconds to 0.
fn normalize_cron(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", expr.trim())
    } else {
        expr.trim().to_string()
    }
}
