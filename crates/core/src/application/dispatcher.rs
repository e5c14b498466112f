// Dispatcher - orchestrates one firing into per-tenant enqueue outcomes
//
// Per (tenant, tick) state machine:
//   Pending -> Guarded(skip) | Enqueuing -> Enqueued
//   Enqueuing -> RetryWait -> Enqueuing (bounded) -> DeadLettered

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::{sleep, timeout, Instant};
use tracing::{info, warn};

use crate::application::dead_letter::DeadLetterRouter;
use crate::application::registry::{FiringContext, TenantRegistry};
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::{
    DispatchOutcome, DispatchRecord, DispatchTick, QueueMessage, QueueName, SkipReason, Tenant,
};
use crate::port::{DispatchGuard, EnqueueError, OutcomeSink, QueueProducer};

/// Dispatcher tuning knobs
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// Default destination for poll-trigger messages
    pub trigger_queue: QueueName,
    /// Per-call timeout on guard/enqueue/dead-letter I/O; an elapsed timeout
    /// is treated as a transport-level failure
    pub op_timeout: Duration,
    /// Parallel per-tenant dispatches per firing
    pub max_concurrent: usize,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            trigger_queue: "polling-trigger".to_string(),
            op_timeout: Duration::from_secs(5),
            max_concurrent: 4,
        }
    }
}

enum GuardDecision {
    Acquired,
    Duplicate,
    Degraded(String),
}

pub struct Dispatcher {
    registry: Arc<TenantRegistry>,
    guard: Arc<dyn DispatchGuard>,
    producer: Arc<dyn QueueProducer>,
    dead_letter: Arc<DeadLetterRouter>,
    retry_policy: Arc<RetryPolicy>,
    sink: Arc<dyn OutcomeSink>,
    settings: DispatcherSettings,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<TenantRegistry>,
        guard: Arc<dyn DispatchGuard>,
        producer: Arc<dyn QueueProducer>,
        dead_letter: Arc<DeadLetterRouter>,
        retry_policy: Arc<RetryPolicy>,
        sink: Arc<dyn OutcomeSink>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            registry,
            guard,
            producer,
            dead_letter,
            retry_policy,
            sink,
            settings,
        }
    }

    /// Process one schedule firing.
    ///
    /// Tenants dispatch independently and concurrently under the configured
    /// bound; no tenant's failure blocks another's. Every terminal outcome is
    /// emitted to the sink and returned.
    pub async fn dispatch_firing(
        &self,
        ctx: &FiringContext,
        deadline: Option<Instant>,
    ) -> Vec<DispatchRecord> {
        let resolution = self.registry.resolve(ctx);

        let mut records = Vec::with_capacity(resolution.tenants.len() + resolution.unknown.len());

        // A tag missing from the registry is fatal for that tenant's tick
        // only; the rest of the firing proceeds
        for tag in &resolution.unknown {
            let tick = DispatchTick::new(tag.clone(), ctx.fired_at);
            records.push(DispatchRecord::new(
                tag.clone(),
                tick.key(),
                DispatchOutcome::Failed {
                    reason: format!("tenant not found in registry: {}", tag),
                    will_retry: false,
                },
            ));
        }

        let dispatched: Vec<DispatchRecord> = stream::iter(resolution.tenants)
            .map(|tenant| self.dispatch_tenant(tenant, ctx, deadline))
            .buffer_unordered(self.settings.max_concurrent.max(1))
            .collect()
            .await;
        records.extend(dispatched);

        for record in &records {
            self.sink.record(record).await;
        }

        records
    }

    async fn dispatch_tenant(
        &self,
        tenant: Tenant,
        ctx: &FiringContext,
        deadline: Option<Instant>,
    ) -> DispatchRecord {
        let tick = DispatchTick::new(tenant.id.clone(), ctx.fired_at);
        let tick_key = tick.key();

        // Abandoning before the guard is acquired must not burn the tenant's
        // one chance for this tick
        if past(deadline) {
            return DispatchRecord::new(
                tenant.id.clone(),
                tick_key,
                DispatchOutcome::Failed {
                    reason: "firing deadline reached before guard acquisition".to_string(),
                    will_retry: true,
                },
            );
        }

        match self.acquire_guard(&tenant, &tick_key).await {
            GuardDecision::Acquired => {}
            GuardDecision::Duplicate => {
                return DispatchRecord::new(
                    tenant.id.clone(),
                    tick_key,
                    DispatchOutcome::Skipped {
                        reason: SkipReason::DuplicateTick,
                    },
                );
            }
            GuardDecision::Degraded(reason) => {
                // Unknown is treated as already acquired: blocking the
                // enqueue keeps duplicate risk no worse than transport dedup
                warn!(
                    tenant = %tenant.id,
                    tick = %tick_key,
                    reason = %reason,
                    "Guard store degraded, blocking enqueue"
                );
                return DispatchRecord::new(
                    tenant.id.clone(),
                    tick_key,
                    DispatchOutcome::Skipped {
                        reason: SkipReason::GuardDegraded,
                    },
                );
            }
        }

        let message = QueueMessage::poll_trigger(&tenant);
        let queue = tenant
            .queue
            .clone()
            .unwrap_or_else(|| self.settings.trigger_queue.clone());

        self.enqueue_with_retry(&tenant, &tick, &queue, &message, deadline)
            .await
    }

    async fn acquire_guard(&self, tenant: &Tenant, tick_key: &str) -> GuardDecision {
        let attempt = timeout(
            self.settings.op_timeout,
            self.guard.try_acquire(&tenant.id, &tick_key.to_string()),
        )
        .await;

        match attempt {
            Ok(Ok(true)) => GuardDecision::Acquired,
            Ok(Ok(false)) => GuardDecision::Duplicate,
            Ok(Err(e)) => GuardDecision::Degraded(e.to_string()),
            Err(_) => GuardDecision::Degraded("guard call timed out".to_string()),
        }
    }

    async fn enqueue_with_retry(
        &self,
        tenant: &Tenant,
        tick: &DispatchTick,
        queue: &str,
        message: &QueueMessage,
        deadline: Option<Instant>,
    ) -> DispatchRecord {
        let mut attempts: u32 = 0;

        loop {
            if past(deadline) {
                return self.abandon(tenant, tick).await;
            }

            attempts += 1;
            let result = timeout(
                self.settings.op_timeout,
                self.producer.enqueue(queue, message),
            )
            .await
            .unwrap_or_else(|_| Err(EnqueueError::Transport("enqueue call timed out".into())));

            let error = match result {
                Ok(receipt) => {
                    info!(
                        tenant = %tenant.id,
                        tick = %tick.key(),
                        queue = %queue,
                        attempt = attempts,
                        ttl = %message.ttl,
                        "Poll trigger enqueued"
                    );
                    return DispatchRecord::new(
                        tenant.id.clone(),
                        tick.key(),
                        DispatchOutcome::Enqueued {
                            message_id: receipt.message_id,
                            request_id: receipt.request_id,
                        },
                    );
                }
                Err(e) => e,
            };

            // Malformed payloads dead-letter immediately: retrying cannot fix them
            if !error.is_retryable() {
                return self
                    .route_to_dead_letter(tenant, tick, queue, message, &error.to_string(), attempts)
                    .await;
            }

            match self.retry_policy.should_retry(&tenant.id, attempts) {
                RetryDecision::Retry(delay_ms) => {
                    let delay = Duration::from_millis(delay_ms.max(0) as u64);
                    if let Some(d) = deadline {
                        if Instant::now() + delay >= d {
                            return self.abandon(tenant, tick).await;
                        }
                    }
                    sleep(delay).await;
                }
                RetryDecision::Exhausted => {
                    return self
                        .route_to_dead_letter(
                            tenant,
                            tick,
                            queue,
                            message,
                            &error.to_string(),
                            attempts,
                        )
                        .await;
                }
            }
        }
    }

    async fn route_to_dead_letter(
        &self,
        tenant: &Tenant,
        tick: &DispatchTick,
        queue: &str,
        message: &QueueMessage,
        reason: &str,
        attempts: u32,
    ) -> DispatchRecord {
        let write = timeout(
            self.settings.op_timeout,
            self.dead_letter.record(tick, queue, message, reason, attempts),
        )
        .await;

        match write {
            Ok(Ok(_receipt)) => DispatchRecord::new(
                tenant.id.clone(),
                tick.key(),
                DispatchOutcome::DeadLettered {
                    reason: reason.to_string(),
                    attempts,
                },
            ),
            Ok(Err(e)) => self.dead_letter_write_failed(tenant, tick, reason, &e.to_string()).await,
            Err(_) => {
                self.dead_letter_write_failed(tenant, tick, reason, "dead-letter call timed out")
                    .await
            }
        }
    }

    /// A failed dead-letter write is never dropped silently: the original
    /// failure is still reported and a critical alert goes to the sink.
    async fn dead_letter_write_failed(
        &self,
        tenant: &Tenant,
        tick: &DispatchTick,
        original_reason: &str,
        write_error: &str,
    ) -> DispatchRecord {
        let record = DispatchRecord::new(
            tenant.id.clone(),
            tick.key(),
            DispatchOutcome::Failed {
                reason: format!(
                    "{}; dead-letter write failed: {}",
                    original_reason, write_error
                ),
                will_retry: false,
            },
        );
        self.sink.critical_alert(&record, write_error).await;
        record
    }

    /// Deadline hit mid-dispatch: give the tick back so a legitimate
    /// same-tick duplicate invocation can still succeed.
    async fn abandon(&self, tenant: &Tenant, tick: &DispatchTick) -> DispatchRecord {
        let release = timeout(
            self.settings.op_timeout,
            self.guard.release(&tenant.id, &tick.key()),
        )
        .await;

        match release {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                tenant = %tenant.id,
                tick = %tick.key(),
                error = %e,
                "Failed to release guard on abandonment"
            ),
            Err(_) => warn!(
                tenant = %tenant.id,
                tick = %tick.key(),
                "Guard release timed out on abandonment"
            ),
        }

        DispatchRecord::new(
            tenant.id.clone(),
            tick.key(),
            DispatchOutcome::Failed {
                reason: "firing deadline reached mid-dispatch; tick released".to_string(),
                will_retry: true,
            },
        )
    }
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageTtl, TenantSpec};
    use crate::port::dispatch_guard::mocks::UnavailableGuard;
    use crate::port::queue_producer::mocks::{MockBehavior, MockQueueProducer};
    use crate::port::outcome_sink::mocks::CollectingSink;
    use crate::port::{InMemoryDispatchGuard, SystemTimeProvider};
    use crate::domain::DeadLetterEnvelope;
    use chrono::{TimeZone, Utc};

    struct Harness {
        dispatcher: Arc<Dispatcher>,
        guard: Arc<InMemoryDispatchGuard>,
        producer: Arc<MockQueueProducer>,
        dead_letter_producer: Arc<MockQueueProducer>,
        sink: Arc<CollectingSink>,
    }

    fn spec(id: &str) -> TenantSpec {
        TenantSpec {
            id: id.to_string(),
            cron: "*/1 * * * *".to_string(),
            schedule: Some("all-partners".to_string()),
            queue: None,
            ttl_seconds: None,
        }
    }

    fn harness(
        tenants: &[TenantSpec],
        producer_behavior: MockBehavior,
        dead_letter_behavior: MockBehavior,
        retry: RetryPolicy,
    ) -> Harness {
        let registry = Arc::new(TenantRegistry::from_specs(tenants).unwrap());
        let guard = Arc::new(InMemoryDispatchGuard::new(
            Duration::from_secs(3600),
            Arc::new(SystemTimeProvider),
        ));
        let producer = Arc::new(MockQueueProducer::new(producer_behavior));
        let dead_letter_producer = Arc::new(MockQueueProducer::new(dead_letter_behavior));
        let dead_letter = Arc::new(DeadLetterRouter::new(
            dead_letter_producer.clone(),
            "polling-trigger-dlq",
        ));
        let sink = Arc::new(CollectingSink::new());

        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            guard.clone(),
            producer.clone(),
            dead_letter,
            Arc::new(retry),
            sink.clone(),
            DispatcherSettings::default(),
        ));

        Harness {
            dispatcher,
            guard,
            producer,
            dead_letter_producer,
            sink,
        }
    }

    fn firing(tags: &[&str]) -> FiringContext {
        FiringContext {
            schedule: "all-partners".to_string(),
            fired_at: Utc.with_ymd_and_hms(2024, 1, 8, 9, 30, 0).unwrap(),
            tenant_tags: Some(tags.iter().map(|s| s.to_string()).collect()),
        }
    }

    // Fast retries so failure-path tests stay quick
    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(5, 2.0, max_attempts)
    }

    #[tokio::test]
    async fn test_single_tenant_enqueues() {
        let h = harness(
            &[spec("cadph")],
            MockBehavior::Success,
            MockBehavior::Success,
            fast_retry(3),
        );

        let records = h.dispatcher.dispatch_firing(&firing(&["cadph"]), None).await;
        assert_eq!(records.len(), 1);
        assert!(matches!(
            records[0].outcome,
            DispatchOutcome::Enqueued { .. }
        ));

        let calls = h.producer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].queue, "polling-trigger");
        assert_eq!(calls[0].payload, b"cadph");
        assert_eq!(calls[0].ttl, MessageTtl::Never);
        assert_eq!(h.sink.records().len(), 1);
    }

    #[tokio::test]
    async fn test_second_invocation_same_tick_skips() {
        let h = harness(
            &[spec("cadph")],
            MockBehavior::Success,
            MockBehavior::Success,
            fast_retry(3),
        );

        let first = h.dispatcher.dispatch_firing(&firing(&["cadph"]), None).await;
        assert!(matches!(
            first[0].outcome,
            DispatchOutcome::Enqueued { .. }
        ));

        // Same tick arriving 2 seconds later
        let mut later = firing(&["cadph"]);
        later.fired_at = Utc.with_ymd_and_hms(2024, 1, 8, 9, 30, 2).unwrap();
        let second = h.dispatcher.dispatch_firing(&later, None).await;
        assert_eq!(
            second[0].outcome,
            DispatchOutcome::Skipped {
                reason: SkipReason::DuplicateTick
            }
        );
        assert_eq!(h.producer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_invocations_single_winner() {
        let h = harness(
            &[spec("cadph")],
            MockBehavior::Success,
            MockBehavior::Success,
            fast_retry(3),
        );

        let mut set = tokio::task::JoinSet::new();
        for _ in 0..4 {
            let dispatcher = h.dispatcher.clone();
            let ctx = firing(&["cadph"]);
            set.spawn(async move { dispatcher.dispatch_firing(&ctx, None).await });
        }

        let mut enqueued = 0;
        let mut skipped = 0;
        while let Some(result) = set.join_next().await {
            for record in result.unwrap() {
                match record.outcome {
                    DispatchOutcome::Enqueued { .. } => enqueued += 1,
                    DispatchOutcome::Skipped {
                        reason: SkipReason::DuplicateTick,
                    } => skipped += 1,
                    other => panic!("unexpected outcome: {:?}", other),
                }
            }
        }

        assert_eq!(enqueued, 1);
        assert_eq!(skipped, 3);
        assert_eq!(h.producer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_errors_retry_then_succeed() {
        let h = harness(
            &[spec("cadph")],
            MockBehavior::TransportFailTimes(2, "throttled".to_string()),
            MockBehavior::Success,
            fast_retry(3),
        );

        let records = h.dispatcher.dispatch_firing(&firing(&["cadph"]), None).await;
        assert!(matches!(
            records[0].outcome,
            DispatchOutcome::Enqueued { .. }
        ));
        assert_eq!(h.producer.call_count(), 3);
        assert_eq!(h.dead_letter_producer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_transport_exhaustion_dead_letters() {
        let h = harness(
            &[spec("cadph")],
            MockBehavior::TransportFail("network down".to_string()),
            MockBehavior::Success,
            fast_retry(3),
        );

        let records = h.dispatcher.dispatch_firing(&firing(&["cadph"]), None).await;
        match &records[0].outcome {
            DispatchOutcome::DeadLettered { attempts, .. } => assert_eq!(*attempts, 3),
            other => panic!("expected DeadLettered, got {:?}", other),
        }
        assert_eq!(h.producer.call_count(), 3);

        let dlq_calls = h.dead_letter_producer.calls();
        assert_eq!(dlq_calls.len(), 1);
        let envelope = DeadLetterEnvelope::from_payload(&dlq_calls[0].payload).unwrap();
        assert_eq!(envelope.original_tenant, "cadph");
        assert_eq!(envelope.attempt_count, 3);
    }

    #[tokio::test]
    async fn test_malformed_dead_letters_without_retry() {
        let h = harness(
            &[spec("cadph")],
            MockBehavior::MalformedFail("payload too large".to_string()),
            MockBehavior::Success,
            fast_retry(3),
        );

        let records = h.dispatcher.dispatch_firing(&firing(&["cadph"]), None).await;
        match &records[0].outcome {
            DispatchOutcome::DeadLettered { attempts, .. } => assert_eq!(*attempts, 1),
            other => panic!("expected DeadLettered, got {:?}", other),
        }
        assert_eq!(h.producer.call_count(), 1);
        assert_eq!(h.dead_letter_producer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_dead_letter_write_failure_raises_alert() {
        let h = harness(
            &[spec("cadph")],
            MockBehavior::MalformedFail("bad payload".to_string()),
            MockBehavior::TransportFail("dlq down".to_string()),
            fast_retry(3),
        );

        let records = h.dispatcher.dispatch_firing(&firing(&["cadph"]), None).await;
        match &records[0].outcome {
            DispatchOutcome::Failed { reason, will_retry } => {
                assert!(reason.contains("bad payload"));
                assert!(reason.contains("dead-letter write failed"));
                assert!(!will_retry);
            }
            other => panic!("expected Failed, got {:?}", other),
        }

        let alerts = h.sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].0.tenant_id, "cadph");
    }

    #[tokio::test]
    async fn test_guard_unavailable_blocks_enqueue() {
        let registry = Arc::new(TenantRegistry::from_specs(&[spec("cadph")]).unwrap());
        let producer = Arc::new(MockQueueProducer::new_success());
        let dead_letter = Arc::new(DeadLetterRouter::new(
            Arc::new(MockQueueProducer::new_success()),
            "polling-trigger-dlq",
        ));
        let sink = Arc::new(CollectingSink::new());
        let dispatcher = Dispatcher::new(
            registry,
            Arc::new(UnavailableGuard),
            producer.clone(),
            dead_letter,
            Arc::new(fast_retry(3)),
            sink.clone(),
            DispatcherSettings::default(),
        );

        let records = dispatcher.dispatch_firing(&firing(&["cadph"]), None).await;
        assert_eq!(
            records[0].outcome,
            DispatchOutcome::Skipped {
                reason: SkipReason::GuardDegraded
            }
        );
        assert_eq!(producer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_one_tenant_failure_leaves_other_unaffected() {
        let h = harness(
            &[spec("cadph"), spec("ladph")],
            MockBehavior::MalformedForPayload(b"ladph".to_vec(), "payload rejected".to_string()),
            MockBehavior::Success,
            fast_retry(3),
        );

        let records = h
            .dispatcher
            .dispatch_firing(&firing(&["cadph", "ladph"]), None)
            .await;
        assert_eq!(records.len(), 2);

        let outcome_of = |id: &str| {
            records
                .iter()
                .find(|r| r.tenant_id == id)
                .map(|r| r.outcome.clone())
                .unwrap()
        };

        assert!(matches!(outcome_of("cadph"), DispatchOutcome::Enqueued { .. }));
        assert!(matches!(
            outcome_of("ladph"),
            DispatchOutcome::DeadLettered { .. }
        ));
        assert_eq!(h.dead_letter_producer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tag_fails_that_tick_only() {
        let h = harness(
            &[spec("cadph")],
            MockBehavior::Success,
            MockBehavior::Success,
            fast_retry(3),
        );

        let records = h
            .dispatcher
            .dispatch_firing(&firing(&["cadph", "ghost"]), None)
            .await;
        assert_eq!(records.len(), 2);

        let ghost = records.iter().find(|r| r.tenant_id == "ghost").unwrap();
        assert!(matches!(
            ghost.outcome,
            DispatchOutcome::Failed {
                will_retry: false,
                ..
            }
        ));

        let cadph = records.iter().find(|r| r.tenant_id == "cadph").unwrap();
        assert!(matches!(cadph.outcome, DispatchOutcome::Enqueued { .. }));
    }

    #[tokio::test]
    async fn test_deadline_mid_retry_releases_tick() {
        // Slow retries against a permanently failing transport, with a
        // deadline that lands inside the first backoff window
        let h = harness(
            &[spec("cadph")],
            MockBehavior::TransportFail("network down".to_string()),
            MockBehavior::Success,
            RetryPolicy::new(10_000, 2.0, 3),
        );

        let deadline = Instant::now() + Duration::from_millis(50);
        let records = h
            .dispatcher
            .dispatch_firing(&firing(&["cadph"]), Some(deadline))
            .await;
        match &records[0].outcome {
            DispatchOutcome::Failed { will_retry, .. } => assert!(*will_retry),
            other => panic!("expected Failed, got {:?}", other),
        }

        // Tick was released: a same-tick duplicate invocation can still win
        let tick = DispatchTick::new("cadph", firing(&["cadph"]).fired_at);
        assert!(h
            .guard
            .try_acquire(&"cadph".to_string(), &tick.key())
            .await
            .unwrap());
    }
}
