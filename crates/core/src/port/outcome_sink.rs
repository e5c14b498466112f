// Outcome Sink Port
// Hands every terminal dispatch outcome to the observability side

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::domain::{DispatchOutcome, DispatchRecord};

/// Receives one structured record per (tenant, tick).
///
/// Downstream alerting watches for anomalous SKIPPED(DUPLICATE_TICK) rates
/// (a sign of multiple live scheduler instances) and for any DEAD_LETTERED
/// event. `critical_alert` is reserved for failures that must never be
/// dropped, like a failed dead-letter write.
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn record(&self, record: &DispatchRecord);

    async fn critical_alert(&self, record: &DispatchRecord, detail: &str);
}

/// Bundled sink: structured tracing events
pub struct TracingOutcomeSink;

#[async_trait]
impl OutcomeSink for TracingOutcomeSink {
    async fn record(&self, record: &DispatchRecord) {
        match &record.outcome {
            DispatchOutcome::Enqueued {
                message_id,
                request_id,
            } => info!(
                tenant = %record.tenant_id,
                tick = %record.tick_key,
                message_id = %message_id,
                request_id = %request_id,
                "Dispatch enqueued"
            ),
            DispatchOutcome::Skipped { reason } => warn!(
                tenant = %record.tenant_id,
                tick = %record.tick_key,
                reason = %reason,
                "Dispatch skipped"
            ),
            DispatchOutcome::DeadLettered { reason, attempts } => error!(
                tenant = %record.tenant_id,
                tick = %record.tick_key,
                reason = %reason,
                attempts = attempts,
                "Dispatch dead-lettered"
            ),
            DispatchOutcome::Failed { reason, will_retry } => error!(
                tenant = %record.tenant_id,
                tick = %record.tick_key,
                reason = %reason,
                will_retry = will_retry,
                "Dispatch failed"
            ),
        }
    }

    async fn critical_alert(&self, record: &DispatchRecord, detail: &str) {
        error!(
            tenant = %record.tenant_id,
            tick = %record.tick_key,
            outcome = record.outcome.label(),
            detail = %detail,
            alert = true,
            "CRITICAL dispatch alert"
        );
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Sink that collects records in memory for assertions
    #[derive(Default)]
    pub struct CollectingSink {
        records: Arc<Mutex<Vec<DispatchRecord>>>,
        alerts: Arc<Mutex<Vec<(DispatchRecord, String)>>>,
    }

    impl CollectingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn records(&self) -> Vec<DispatchRecord> {
            self.records.lock().unwrap().clone()
        }

        pub fn alerts(&self) -> Vec<(DispatchRecord, String)> {
            self.alerts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OutcomeSink for CollectingSink {
        async fn record(&self, record: &DispatchRecord) {
            self.records.lock().unwrap().push(record.clone());
        }

        async fn critical_alert(&self, record: &DispatchRecord, detail: &str) {
            self.alerts
                .lock()
                .unwrap()
                .push((record.clone(), detail.to_string()));
        }
    }
}
