//! Polldispatch CLI - operator tooling for the dead-letter queue
//!
//! Dead-lettered dispatches stay on their queue until someone deals with
//! them; this tool is the "inspect and manually replay" side of that
//! contract.

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use tabled::{Table, Tabled};

use polldispatch_core::domain::{DeadLetterEnvelope, MessageTtl, QueueMessage};
use polldispatch_core::port::{QueueProducer, SystemTimeProvider};
use polldispatch_infra_sqlite::{create_pool, run_migrations, SqliteQueueTransport};

const DEFAULT_DB_PATH: &str = "~/.polldispatch/queue.db";
const DEFAULT_DLQ: &str = "polling-trigger-dlq";

#[derive(Parser)]
#[command(name = "polldispatch")]
#[command(about = "Polldispatch dead-letter queue tooling", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the queue database
    #[arg(long, env = "POLLDISPATCH_DB_PATH", default_value = DEFAULT_DB_PATH)]
    db: String,

    /// Dead-letter queue name
    #[arg(long, env = "POLLDISPATCH_DLQ", default_value = DEFAULT_DLQ)]
    queue: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List dead-lettered dispatches
    List,

    /// Show one dead-lettered dispatch in full
    Show {
        /// Message ID
        message_id: String,
    },

    /// Re-enqueue a dead-lettered dispatch onto its original queue
    Replay {
        /// Message ID
        message_id: String,
    },

    /// Delete a dead-lettered dispatch without replaying it
    Discard {
        /// Message ID
        message_id: String,
    },
}

#[derive(Tabled)]
struct DeadLetterRow {
    message_id: String,
    tenant: String,
    tick: String,
    attempts: u32,
    reason: String,
    dead_lettered_at: String,
}

fn format_timestamp(epoch_ms: i64) -> String {
    DateTime::from_timestamp_millis(epoch_ms)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| epoch_ms.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let db_path = shellexpand::tilde(&cli.db).into_owned();
    let pool = create_pool(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open queue database {}: {}", db_path, e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    let transport = SqliteQueueTransport::new(pool, Arc::new(SystemTimeProvider));

    match cli.command {
        Commands::List => list(&transport, &cli.queue).await,
        Commands::Show { message_id } => show(&transport, &message_id).await,
        Commands::Replay { message_id } => replay(&transport, &message_id).await,
        Commands::Discard { message_id } => discard(&transport, &message_id).await,
    }
}

async fn list(transport: &SqliteQueueTransport, queue: &str) -> Result<()> {
    let messages = transport.list(queue).await?;

    if messages.is_empty() {
        println!("{}", format!("No dead-lettered dispatches on '{}'", queue).green());
        return Ok(());
    }

    let rows: Vec<DeadLetterRow> = messages
        .iter()
        .map(|m| match DeadLetterEnvelope::from_payload(&m.payload) {
            Ok(envelope) => DeadLetterRow {
                message_id: m.id.clone(),
                tenant: envelope.original_tenant,
                tick: envelope.original_tick,
                attempts: envelope.attempt_count,
                reason: envelope.failure_reason,
                dead_lettered_at: format_timestamp(m.enqueued_at),
            },
            Err(_) => DeadLetterRow {
                message_id: m.id.clone(),
                tenant: "<unparseable>".to_string(),
                tick: String::new(),
                attempts: 0,
                reason: String::new(),
                dead_lettered_at: format_timestamp(m.enqueued_at),
            },
        })
        .collect();

    println!("{}", Table::new(rows));
    println!(
        "{}",
        format!("{} dead-lettered dispatch(es) on '{}'", messages.len(), queue).red()
    );
    Ok(())
}

async fn show(transport: &SqliteQueueTransport, message_id: &str) -> Result<()> {
    let message = transport
        .find(message_id)
        .await?
        .with_context(|| format!("No message with id {}", message_id))?;

    let envelope = DeadLetterEnvelope::from_payload(&message.payload)
        .context("Message payload is not a dead-letter envelope")?;

    println!("{}", serde_json::to_string_pretty(&envelope)?);
    println!();
    println!("queue:            {}", message.queue);
    println!("dead_lettered_at: {}", format_timestamp(message.enqueued_at));
    Ok(())
}

async fn replay(transport: &SqliteQueueTransport, message_id: &str) -> Result<()> {
    let message = transport
        .find(message_id)
        .await?
        .with_context(|| format!("No message with id {}", message_id))?;

    let envelope = DeadLetterEnvelope::from_payload(&message.payload)
        .context("Message payload is not a dead-letter envelope")?;

    // Replays keep trigger-message semantics: the payload must not expire
    let replayed = QueueMessage {
        payload: envelope.payload.clone().into_bytes(),
        ttl: MessageTtl::Never,
    };

    let receipt = transport
        .enqueue(&envelope.original_queue, &replayed)
        .await
        .with_context(|| format!("Replay enqueue to '{}' failed", envelope.original_queue))?;

    if !transport.delete(message_id).await? {
        bail!(
            "Replayed as {} but could not delete dead-letter message {}",
            receipt.message_id,
            message_id
        );
    }

    println!(
        "{}",
        format!(
            "Replayed tenant '{}' tick {} onto '{}' as message {}",
            envelope.original_tenant,
            envelope.original_tick,
            envelope.original_queue,
            receipt.message_id
        )
        .green()
    );
    Ok(())
}

async fn discard(transport: &SqliteQueueTransport, message_id: &str) -> Result<()> {
    if transport.delete(message_id).await? {
        println!("{}", format!("Discarded {}", message_id).yellow());
        Ok(())
    } else {
        bail!("No message with id {}", message_id);
    }
}
