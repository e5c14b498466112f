// Dead Letter Router - persists terminally failed dispatch attempts

use std::sync::Arc;

use tracing::{error, info};

use crate::domain::{DeadLetterEnvelope, DispatchTick, MessageTtl, QueueMessage, QueueName};
use crate::error::{AppError, Result};
use crate::port::{EnqueueReceipt, QueueProducer};

/// Routes messages that exhausted their retry budget (or were malformed on
/// arrival) to a separate durable dead-letter queue, tagged so an operator
/// can inspect and manually replay them.
///
/// This path must not lose data silently: a failed dead-letter write is
/// escalated by the caller as a critical alert, never swallowed.
pub struct DeadLetterRouter {
    producer: Arc<dyn QueueProducer>,
    queue: QueueName,
}

impl DeadLetterRouter {
    pub fn new(producer: Arc<dyn QueueProducer>, queue: impl Into<QueueName>) -> Self {
        Self {
            producer,
            queue: queue.into(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Persist one failed dispatch attempt.
    ///
    /// The envelope never expires - a dead-lettered dispatch stays visible
    /// until an operator deals with it.
    pub async fn record(
        &self,
        tick: &DispatchTick,
        original_queue: &str,
        message: &QueueMessage,
        failure_reason: &str,
        attempt_count: u32,
    ) -> Result<EnqueueReceipt> {
        let envelope = DeadLetterEnvelope {
            original_tenant: tick.tenant_id.clone(),
            original_tick: tick.key(),
            original_queue: original_queue.to_string(),
            failure_reason: failure_reason.to_string(),
            attempt_count,
            payload: String::from_utf8_lossy(&message.payload).into_owned(),
        };

        let dead_letter_message = QueueMessage {
            payload: envelope.to_payload()?,
            ttl: MessageTtl::Never,
        };

        let receipt = self
            .producer
            .enqueue(&self.queue, &dead_letter_message)
            .await
            .map_err(|e| {
                error!(
                    tenant = %tick.tenant_id,
                    tick = %tick.key(),
                    queue = %self.queue,
                    error = %e,
                    "Dead-letter write failed"
                );
                AppError::Enqueue(e)
            })?;

        info!(
            tenant = %tick.tenant_id,
            tick = %tick.key(),
            queue = %self.queue,
            message_id = %receipt.message_id,
            "Dispatch dead-lettered"
        );

        Ok(receipt)
    }
}
