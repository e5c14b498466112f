// SQLite Maintenance Implementation

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

use polldispatch_core::error::{AppError, Result};
use polldispatch_core::port::{Maintenance, TimeProvider};

/// SQLite maintenance implementation
pub struct SqliteMaintenance {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteMaintenance {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[async_trait]
impl Maintenance for SqliteMaintenance {
    async fn purge_expired_messages(&self) -> Result<i64> {
        let now = self.time_provider.now_millis();

        let result =
            sqlx::query("DELETE FROM queue_messages WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;

        let deleted = result.rows_affected() as i64;
        if deleted > 0 {
            info!(deleted = deleted, "Purged expired messages");
        }
        Ok(deleted)
    }

    async fn purge_stale_guard_entries(&self, horizon_hours: i64) -> Result<i64> {
        let now = self.time_provider.now_millis();
        let cutoff = now - horizon_hours * 60 * 60 * 1000;

        let result = sqlx::query("DELETE FROM dispatch_guard WHERE acquired_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let deleted = result.rows_affected() as i64;
        if deleted > 0 {
            info!(deleted = deleted, "Purged stale guard entries");
        }
        Ok(deleted)
    }

    async fn vacuum(&self) -> Result<()> {
        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}
