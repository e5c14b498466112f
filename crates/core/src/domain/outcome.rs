// Dispatch Outcome - per (tenant, tick) result, emitted for observability

use serde::{Deserialize, Serialize};

use crate::domain::tenant::TenantId;
use crate::domain::tick::TickKey;

/// Why a dispatch was skipped without an enqueue attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    /// The guard already recorded a winner for this (tenant, tick)
    DuplicateTick,
    /// The guard store was unreachable; unknown is treated as already acquired
    GuardDegraded,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::DuplicateTick => write!(f, "DUPLICATE_TICK"),
            SkipReason::GuardDegraded => write!(f, "GUARD_DEGRADED"),
        }
    }
}

/// Terminal result of one tenant's dispatch for one tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "outcome")]
pub enum DispatchOutcome {
    Enqueued {
        message_id: String,
        request_id: String,
    },
    Skipped {
        reason: SkipReason,
    },
    DeadLettered {
        reason: String,
        attempts: u32,
    },
    Failed {
        reason: String,
        /// True when a later invocation for the same tick may still succeed
        will_retry: bool,
    },
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Enqueued { .. } => "ENQUEUED",
            DispatchOutcome::Skipped { .. } => "SKIPPED",
            DispatchOutcome::DeadLettered { .. } => "DEAD_LETTERED",
            DispatchOutcome::Failed { .. } => "FAILED",
        }
    }
}

/// Outcome paired with its (tenant, tick) identity, as handed to the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub tenant_id: TenantId,
    pub tick_key: TickKey,
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
}

impl DispatchRecord {
    pub fn new(tenant_id: impl Into<TenantId>, tick_key: impl Into<TickKey>, outcome: DispatchOutcome) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            tick_key: tick_key.into(),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serializes_with_tag() {
        let record = DispatchRecord::new(
            "cadph",
            "2024-01-08T09:30Z",
            DispatchOutcome::Skipped {
                reason: SkipReason::DuplicateTick,
            },
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["outcome"], "SKIPPED");
        assert_eq!(json["reason"], "DUPLICATE_TICK");
        assert_eq!(json["tenant_id"], "cadph");
    }
}
