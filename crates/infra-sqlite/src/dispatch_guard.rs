// SQLite Dispatch Guard (shared check-and-set store)
//
// The primary key on (tenant_id, tick_key) is the atomicity mechanism:
// concurrent INSERT OR IGNORE calls for the same key let exactly one
// caller observe an inserted row, even across dispatcher instances
// sharing the database file.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

use polldispatch_core::domain::{TenantId, TickKey};
use polldispatch_core::port::{DispatchGuard, GuardError, TimeProvider};

pub struct SqliteDispatchGuard {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteDispatchGuard {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[async_trait]
impl DispatchGuard for SqliteDispatchGuard {
    async fn try_acquire(
        &self,
        tenant_id: &TenantId,
        tick_key: &TickKey,
    ) -> Result<bool, GuardError> {
        let now = self.time_provider.now_millis();

        let result = sqlx::query(
            "INSERT INTO dispatch_guard (tenant_id, tick_key, acquired_at) \
             VALUES (?, ?, ?) ON CONFLICT (tenant_id, tick_key) DO NOTHING",
        )
        .bind(tenant_id)
        .bind(tick_key)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| GuardError::Unavailable(e.to_string()))?;

        let acquired = result.rows_affected() == 1;
        debug!(
            tenant = %tenant_id,
            tick = %tick_key,
            acquired = acquired,
            "Guard check-and-set"
        );
        Ok(acquired)
    }

    async fn release(&self, tenant_id: &TenantId, tick_key: &TickKey) -> Result<(), GuardError> {
        sqlx::query("DELETE FROM dispatch_guard WHERE tenant_id = ? AND tick_key = ?")
            .bind(tenant_id)
            .bind(tick_key)
            .execute(&self.pool)
            .await
            .map_err(|e| GuardError::Unavailable(e.to_string()))?;
        Ok(())
    }
}
