// Dispatch Tick - the logical unit of "this tenant was due to fire at this time"

use chrono::{DateTime, Timelike, Utc};

use crate::domain::tenant::TenantId;

/// Stable string key for a (tenant, tick) pair, e.g. "2024-01-08T09:30Z"
pub type TickKey = String;

/// One logical scheduled firing instant for a tenant, truncated to schedule
/// resolution (whole minutes - the finest granularity the engine schedules at).
///
/// Two invocations of the handler within the same minute for the same tenant
/// map to the same tick, which is what lets the guard dedupe platform-level
/// duplicate firings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTick {
    pub tenant_id: TenantId,
    pub fired_at: DateTime<Utc>,
}

impl DispatchTick {
    pub fn new(tenant_id: impl Into<TenantId>, fired_at: DateTime<Utc>) -> Self {
        let truncated = fired_at
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(fired_at);
        Self {
            tenant_id: tenant_id.into(),
            fired_at: truncated,
        }
    }

    /// Dedup key at schedule resolution
    pub fn key(&self) -> TickKey {
        self.fired_at.format("%Y-%m-%dT%H:%MZ").to_string()
    }
}
