// Dispatch Guard Port
// Idempotency gate: at most one winning acquire per (tenant, tick)

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{TenantId, TickKey};
use crate::port::TimeProvider;

/// Guard store failures.
///
/// When the store is unreachable the caller must treat "unknown" as "already
/// acquired" and block the enqueue - duplicate-enqueue risk must never get
/// worse than the transport's own dedup.
#[derive(Error, Debug, Clone)]
pub enum GuardError {
    #[error("Guard store unavailable: {0}")]
    Unavailable(String),
}

/// Per-tenant, per-tick idempotency gate.
///
/// `try_acquire` returns true exactly once per (tenant, tick) until the entry
/// ages out of the dedup horizon. Two concurrent calls for the same key must
/// never both return true - implementations need atomic check-and-set.
#[async_trait]
pub trait DispatchGuard: Send + Sync {
    async fn try_acquire(&self, tenant_id: &TenantId, tick_key: &TickKey)
        -> Result<bool, GuardError>;

    /// Give the tick back. Only the deadline-abandonment path calls this, so
    /// a legitimate same-tick duplicate invocation can still win.
    async fn release(&self, tenant_id: &TenantId, tick_key: &TickKey) -> Result<(), GuardError>;
}

/// Process-local guard for single-instance deployments.
///
/// Entries expire after the horizon; expiry is enforced lazily on each
/// acquire and by the maintenance sweep in shared-store implementations.
pub struct InMemoryDispatchGuard {
    entries: Mutex<HashMap<(TenantId, TickKey), i64>>,
    horizon: Duration,
    time_provider: Arc<dyn TimeProvider>,
}

impl InMemoryDispatchGuard {
    pub fn new(horizon: Duration, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            horizon,
            time_provider,
        }
    }
}

#[async_trait]
impl DispatchGuard for InMemoryDispatchGuard {
    async fn try_acquire(
        &self,
        tenant_id: &TenantId,
        tick_key: &TickKey,
    ) -> Result<bool, GuardError> {
        let now = self.time_provider.now_millis();
        let horizon_ms = self.horizon.as_millis() as i64;

        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, acquired_at| now - *acquired_at < horizon_ms);

        let key = (tenant_id.clone(), tick_key.clone());
        if entries.contains_key(&key) {
            return Ok(false);
        }
        entries.insert(key, now);
        Ok(true)
    }

    async fn release(&self, tenant_id: &TenantId, tick_key: &TickKey) -> Result<(), GuardError> {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(&(tenant_id.clone(), tick_key.clone()));
        Ok(())
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;

    /// Guard whose backing store is down
    pub struct UnavailableGuard;

    #[async_trait]
    impl DispatchGuard for UnavailableGuard {
        async fn try_acquire(
            &self,
            _tenant_id: &TenantId,
            _tick_key: &TickKey,
        ) -> Result<bool, GuardError> {
            Err(GuardError::Unavailable("store down".to_string()))
        }

        async fn release(
            &self,
            _tenant_id: &TenantId,
            _tick_key: &TickKey,
        ) -> Result<(), GuardError> {
            Err(GuardError::Unavailable("store down".to_string()))
        }
    }

    /// Guard that reports every tick as already taken
    pub struct AlwaysDuplicateGuard;

    #[async_trait]
    impl DispatchGuard for AlwaysDuplicateGuard {
        async fn try_acquire(
            &self,
            _tenant_id: &TenantId,
            _tick_key: &TickKey,
        ) -> Result<bool, GuardError> {
            Ok(false)
        }

        async fn release(
            &self,
            _tenant_id: &TenantId,
            _tick_key: &TickKey,
        ) -> Result<(), GuardError> {
            Ok(())
        }
    }
}
