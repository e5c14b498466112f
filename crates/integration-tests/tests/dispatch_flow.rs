//! End-to-end dispatch flow over the real SQLite guard and transport

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use polldispatch_core::application::{
    DeadLetterRouter, Dispatcher, DispatcherSettings, FiringContext, RetryPolicy, TenantRegistry,
};
use polldispatch_core::domain::{DispatchOutcome, SkipReason, TenantSpec};
use polldispatch_core::port::outcome_sink::mocks::CollectingSink;
use polldispatch_core::port::SystemTimeProvider;
use polldispatch_infra_sqlite::{
    create_pool, run_migrations, SqliteDispatchGuard, SqliteQueueTransport,
};

struct Stack {
    dispatcher: Arc<Dispatcher>,
    transport: Arc<SqliteQueueTransport>,
    sink: Arc<CollectingSink>,
}

async fn stack(db_path: &str, specs: &[TenantSpec]) -> Stack {
    let _ = std::fs::remove_file(db_path);
    let pool = create_pool(db_path).await.unwrap();
    run_migrations(&pool).await.unwrap();

    let time_provider = Arc::new(SystemTimeProvider);
    let registry = Arc::new(TenantRegistry::from_specs(specs).unwrap());
    let guard = Arc::new(SqliteDispatchGuard::new(pool.clone(), time_provider.clone()));
    let transport = Arc::new(SqliteQueueTransport::new(pool.clone(), time_provider.clone()));
    let dead_letter_transport = Arc::new(SqliteQueueTransport::new(pool, time_provider));
    let dead_letter = Arc::new(DeadLetterRouter::new(
        dead_letter_transport,
        "polling-trigger-dlq",
    ));
    let sink = Arc::new(CollectingSink::new());

    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        guard,
        transport.clone(),
        dead_letter,
        Arc::new(RetryPolicy::new(10, 2.0, 3)),
        sink.clone(),
        DispatcherSettings::default(),
    ));

    Stack {
        dispatcher,
        transport,
        sink,
    }
}

fn monday_morning_firing(second: u32) -> FiringContext {
    FiringContext {
        schedule: "cadph".to_string(),
        // A Monday in January
        fired_at: Utc.with_ymd_and_hms(2024, 1, 8, 9, 30, second).unwrap(),
        tenant_tags: None,
    }
}

#[tokio::test]
async fn test_scheduled_fire_enqueues_then_duplicate_skips() {
    let db = "/tmp/polldispatch_it_dispatch_flow.db";
    let s = stack(
        db,
        &[TenantSpec {
            id: "cadph".to_string(),
            cron: "30 9 * * Mon".to_string(),
            schedule: None,
            queue: None,
            ttl_seconds: None,
        }],
    )
    .await;

    // First invocation for the tick wins
    let first = s
        .dispatcher
        .dispatch_firing(&monday_morning_firing(0), None)
        .await;
    assert_eq!(first.len(), 1);
    let message_id = match &first[0].outcome {
        DispatchOutcome::Enqueued { message_id, .. } => message_id.clone(),
        other => panic!("expected Enqueued, got {:?}", other),
    };

    let stored = s.transport.find(&message_id).await.unwrap().unwrap();
    assert_eq!(stored.queue, "polling-trigger");
    assert_eq!(stored.payload, b"cadph");
    // Trigger messages never expire by default
    assert_eq!(stored.expires_at, None);

    // Second invocation 2 seconds later is the same tick
    let second = s
        .dispatcher
        .dispatch_firing(&monday_morning_firing(2), None)
        .await;
    assert_eq!(
        second[0].outcome,
        DispatchOutcome::Skipped {
            reason: SkipReason::DuplicateTick
        }
    );

    // Exactly one message made it to the queue
    assert_eq!(s.transport.list("polling-trigger").await.unwrap().len(), 1);

    // Every terminal outcome reached the sink
    assert_eq!(s.sink.records().len(), 2);

    let _ = std::fs::remove_file(db);
}

#[tokio::test]
async fn test_ttl_override_round_trips_to_store() {
    let db = "/tmp/polldispatch_it_ttl_override.db";
    let s = stack(
        db,
        &[TenantSpec {
            id: "ladph".to_string(),
            cron: "0 12 * * *".to_string(),
            schedule: None,
            queue: Some("ladph-polls".to_string()),
            ttl_seconds: Some(900),
        }],
    )
    .await;

    let ctx = FiringContext {
        schedule: "ladph".to_string(),
        fired_at: Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap(),
        tenant_tags: None,
    };
    let records = s.dispatcher.dispatch_firing(&ctx, None).await;
    let message_id = match &records[0].outcome {
        DispatchOutcome::Enqueued { message_id, .. } => message_id.clone(),
        other => panic!("expected Enqueued, got {:?}", other),
    };

    let stored = s.transport.find(&message_id).await.unwrap().unwrap();
    // Queue override honored, TTL passes through unchanged
    assert_eq!(stored.queue, "ladph-polls");
    let expires_at = stored.expires_at.expect("bounded TTL stores expiry");
    assert_eq!(expires_at - stored.enqueued_at, 900_000);

    let _ = std::fs::remove_file(db);
}

#[tokio::test]
async fn test_next_minute_is_a_fresh_tick() {
    let db = "/tmp/polldispatch_it_fresh_tick.db";
    let s = stack(
        db,
        &[TenantSpec {
            id: "cadph".to_string(),
            cron: "*/1 * * * *".to_string(),
            schedule: None,
            queue: None,
            ttl_seconds: None,
        }],
    )
    .await;

    let mut ctx = FiringContext {
        schedule: "cadph".to_string(),
        fired_at: Utc.with_ymd_and_hms(2024, 1, 8, 9, 30, 0).unwrap(),
        tenant_tags: None,
    };
    let first = s.dispatcher.dispatch_firing(&ctx, None).await;
    assert!(matches!(first[0].outcome, DispatchOutcome::Enqueued { .. }));

    ctx.fired_at = Utc.with_ymd_and_hms(2024, 1, 8, 9, 31, 0).unwrap();
    let next = s.dispatcher.dispatch_firing(&ctx, None).await;
    assert!(matches!(next[0].outcome, DispatchOutcome::Enqueued { .. }));

    assert_eq!(s.transport.list("polling-trigger").await.unwrap().len(), 2);

    let _ = std::fs::remove_file(db);
}

#[tokio::test]
async fn test_dispatch_survives_long_tick_durations() {
    // Dispatch with a generous deadline behaves exactly like no deadline
    let db = "/tmp/polldispatch_it_with_deadline.db";
    let s = stack(
        db,
        &[TenantSpec {
            id: "cadph".to_string(),
            cron: "30 9 * * Mon".to_string(),
            schedule: None,
            queue: None,
            ttl_seconds: None,
        }],
    )
    .await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    let records = s
        .dispatcher
        .dispatch_firing(&monday_morning_firing(0), Some(deadline))
        .await;
    assert!(matches!(records[0].outcome, DispatchOutcome::Enqueued { .. }));

    let _ = std::fs::remove_file(db);
}
