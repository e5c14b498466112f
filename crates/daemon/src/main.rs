//! Polldispatch Daemon - Main Entry Point
//!
//! Composition root: wires the tenant registry, guard store, queue
//! transport, dead-letter router and schedule runner together.

mod config;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use polldispatch_core::application::{
    shutdown_channel, DeadLetterRouter, Dispatcher, DispatcherSettings, MaintenanceScheduler,
    RetryPolicy, RunnerSettings, ScheduleRunner, TenantRegistry,
};
use polldispatch_core::port::{MaintenanceConfig, SystemTimeProvider, TracingOutcomeSink};
use polldispatch_infra_sqlite::{
    create_pool, run_migrations, SqliteDispatchGuard, SqliteMaintenance, SqliteQueueTransport,
};

use config::EngineConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_CONFIG_PATH: &str = "~/.polldispatch/config.json";
const DEFAULT_DB_PATH: &str = "~/.polldispatch/queue.db";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging
    let log_format =
        std::env::var("POLLDISPATCH_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("polldispatch=info"))
        .expect("Failed to create env filter");

    match log_format.as_str() {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            // Development: Pretty formatting with colors
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("Polldispatch v{} starting...", VERSION);

    // 1.1. Initialize OpenTelemetry (optional)
    if let Err(e) = telemetry::init_telemetry() {
        tracing::warn!(error = ?e, "Failed to initialize OpenTelemetry (continuing without it)");
    }

    // 2. Load configuration
    let config_path = std::env::var("POLLDISPATCH_CONFIG")
        .unwrap_or_else(|_| shellexpand::tilde(DEFAULT_CONFIG_PATH).into_owned());
    let config = EngineConfig::load(&config_path)?;

    let db_path = std::env::var("POLLDISPATCH_DB_PATH")
        .unwrap_or_else(|_| shellexpand::tilde(DEFAULT_DB_PATH).into_owned());

    info!(
        config_path = %config_path,
        db_path = %db_path,
        tenants = config.tenants.len(),
        "Configuration loaded"
    );

    // 3. Initialize database
    let pool = create_pool(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 4. Setup dependencies (DI wiring)
    let time_provider = Arc::new(SystemTimeProvider);

    let registry = Arc::new(
        TenantRegistry::from_specs(&config.tenants)
            .map_err(|e| anyhow::anyhow!("Invalid tenant registry: {}", e))?,
    );

    let guard = Arc::new(SqliteDispatchGuard::new(pool.clone(), time_provider.clone()));

    // The trigger producer and the dead-letter producer are distinct
    // transport instances against distinct queue targets
    let producer = Arc::new(SqliteQueueTransport::new(
        pool.clone(),
        time_provider.clone(),
    ));
    let dead_letter_producer = Arc::new(SqliteQueueTransport::new(
        pool.clone(),
        time_provider.clone(),
    ));
    let dead_letter = Arc::new(DeadLetterRouter::new(
        dead_letter_producer,
        config.queue.dead_letter_queue.clone(),
    ));

    let retry_policy = Arc::new(RetryPolicy::new(
        config.dispatch.retry_base_delay_ms,
        config.dispatch.backoff_factor,
        config.dispatch.max_attempts,
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        guard,
        producer,
        dead_letter,
        retry_policy,
        Arc::new(TracingOutcomeSink),
        DispatcherSettings {
            trigger_queue: config.queue.trigger_queue.clone(),
            op_timeout: Duration::from_secs(config.dispatch.op_timeout_secs),
            max_concurrent: config.dispatch.max_concurrent,
        },
    ));

    // 5. Start maintenance scheduler
    info!("Starting maintenance scheduler...");
    let maintenance = Arc::new(SqliteMaintenance::new(pool.clone(), time_provider.clone()));
    let maintenance_scheduler = MaintenanceScheduler::new(
        maintenance,
        MaintenanceConfig {
            guard_horizon_hours: config.dispatch.guard_horizon_hours,
            interval_hours: config.dispatch.maintenance_interval_hours,
        },
    );
    tokio::spawn(async move {
        maintenance_scheduler.run().await;
    });

    // 6. Start schedule runner (firing loop)
    info!("Starting schedule runner...");
    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let runner = ScheduleRunner::new(
        registry,
        dispatcher,
        RunnerSettings {
            timezone: config.dispatch.timezone,
            firing_deadline: Duration::from_secs(config.dispatch.firing_deadline_secs),
        },
    );

    let runner_handle = tokio::spawn(async move {
        if let Err(e) = runner.run(shutdown_rx).await {
            tracing::error!(error = ?e, "Schedule runner failed");
        }
    });

    info!("System ready. Dispatching on schedule.");
    info!("Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 8. Graceful shutdown
    shutdown_tx.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(5), runner_handle).await;

    info!("Shutdown complete.");

    Ok(())
}
