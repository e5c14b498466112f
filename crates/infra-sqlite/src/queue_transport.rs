// SQLite Queue Transport (QueueProducer implementation)
//
// A durable message table standing in for the managed queue service in
// local and single-node deployments. The producer writes messages that are
// immediately visible; the consumer-side visibility timeout is applied where
// messages are read and must exceed the consumer's worst-case processing
// time, or a message becomes re-visible and is processed twice.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use polldispatch_core::domain::{MessageTtl, QueueMessage};
use polldispatch_core::error::{AppError, Result};
use polldispatch_core::port::{EnqueueError, EnqueueReceipt, QueueProducer, TimeProvider};

/// Transport payload ceiling; larger messages are malformed, not retryable
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// A stored message row, as surfaced to operator tooling
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredMessage {
    pub id: String,
    pub queue: String,
    pub payload: Vec<u8>,
    pub request_id: String,
    pub enqueued_at: i64,
    pub expires_at: Option<i64>,
    pub visible_at: i64,
    pub dequeue_count: i64,
}

pub struct SqliteQueueTransport {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteQueueTransport {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    /// List messages currently stored on a queue, oldest first
    pub async fn list(&self, queue: &str) -> Result<Vec<StoredMessage>> {
        sqlx::query_as::<_, StoredMessage>(
            "SELECT * FROM queue_messages WHERE queue = ? ORDER BY enqueued_at ASC",
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Fetch one message by id
    pub async fn find(&self, message_id: &str) -> Result<Option<StoredMessage>> {
        sqlx::query_as::<_, StoredMessage>("SELECT * FROM queue_messages WHERE id = ?")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete one message by id; returns whether a row was removed
    pub async fn delete(&self, message_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM queue_messages WHERE id = ?")
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl QueueProducer for SqliteQueueTransport {
    async fn enqueue(
        &self,
        queue: &str,
        message: &QueueMessage,
    ) -> std::result::Result<EnqueueReceipt, EnqueueError> {
        if message.payload.len() > MAX_PAYLOAD_BYTES {
            return Err(EnqueueError::Malformed(format!(
                "payload of {} bytes exceeds the {} byte limit",
                message.payload.len(),
                MAX_PAYLOAD_BYTES
            )));
        }

        let now = self.time_provider.now_millis();
        // TTL round-trips exactly: Never stores no expiration at all
        let expires_at = match message.ttl {
            MessageTtl::Never => None,
            MessageTtl::Bounded(d) => Some(now + d.as_millis() as i64),
        };

        let message_id = Uuid::new_v4().to_string();
        let request_id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO queue_messages (
                id, queue, payload, request_id, enqueued_at, expires_at, visible_at, dequeue_count
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&message_id)
        .bind(queue)
        .bind(&message.payload)
        .bind(&request_id)
        .bind(now)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| EnqueueError::Transport(e.to_string()))?;

        debug!(
            queue = %queue,
            message_id = %message_id,
            request_id = %request_id,
            ttl = %message.ttl,
            "Message enqueued"
        );

        Ok(EnqueueReceipt {
            message_id,
            request_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use polldispatch_core::port::SystemTimeProvider;
    use std::time::Duration;

    async fn transport(db_path: &str) -> SqliteQueueTransport {
        let _ = std::fs::remove_file(db_path);
        let pool = create_pool(db_path).await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteQueueTransport::new(pool, Arc::new(SystemTimeProvider))
    }

    fn message(payload: &[u8], ttl: MessageTtl) -> QueueMessage {
        QueueMessage {
            payload: payload.to_vec(),
            ttl,
        }
    }

    #[tokio::test]
    async fn test_enqueue_never_expires_stores_no_expiration() {
        let db = "/tmp/polldispatch_test_enqueue_never.db";
        let t = transport(db).await;

        let receipt = t
            .enqueue("polling-trigger", &message(b"cadph", MessageTtl::Never))
            .await
            .unwrap();

        let stored = t.find(&receipt.message_id).await.unwrap().unwrap();
        assert_eq!(stored.queue, "polling-trigger");
        assert_eq!(stored.payload, b"cadph");
        assert_eq!(stored.expires_at, None);
        assert_eq!(stored.request_id, receipt.request_id);

        let _ = std::fs::remove_file(db);
    }

    #[tokio::test]
    async fn test_enqueue_bounded_ttl_round_trips() {
        let db = "/tmp/polldispatch_test_enqueue_bounded.db";
        let t = transport(db).await;

        let ttl = Duration::from_secs(600);
        let receipt = t
            .enqueue("polling-trigger", &message(b"ladph", MessageTtl::Bounded(ttl)))
            .await
            .unwrap();

        let stored = t.find(&receipt.message_id).await.unwrap().unwrap();
        let expires_at = stored.expires_at.expect("bounded TTL must store expiry");
        assert_eq!(expires_at - stored.enqueued_at, 600_000);

        let _ = std::fs::remove_file(db);
    }

    #[tokio::test]
    async fn test_oversized_payload_is_malformed() {
        let db = "/tmp/polldispatch_test_enqueue_oversized.db";
        let t = transport(db).await;

        let big = vec![0u8; MAX_PAYLOAD_BYTES + 1];
        let err = t
            .enqueue("polling-trigger", &message(&big, MessageTtl::Never))
            .await
            .unwrap_err();
        assert!(matches!(err, EnqueueError::Malformed(_)));
        assert!(!err.is_retryable());

        let _ = std::fs::remove_file(db);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let db = "/tmp/polldispatch_test_list_delete.db";
        let t = transport(db).await;

        let receipt = t
            .enqueue("polling-trigger-dlq", &message(b"x", MessageTtl::Never))
            .await
            .unwrap();
        t.enqueue("polling-trigger-dlq", &message(b"y", MessageTtl::Never))
            .await
            .unwrap();

        assert_eq!(t.list("polling-trigger-dlq").await.unwrap().len(), 2);
        assert!(t.delete(&receipt.message_id).await.unwrap());
        assert!(!t.delete(&receipt.message_id).await.unwrap());
        assert_eq!(t.list("polling-trigger-dlq").await.unwrap().len(), 1);

        let _ = std::fs::remove_file(db);
    }
}
