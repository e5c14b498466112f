// Store Maintenance Port

use async_trait::async_trait;

use crate::error::Result;

/// Maintenance configuration
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Guard entries older than this are past the dedup horizon and purgeable
    pub guard_horizon_hours: i64,

    /// How often the sweep runs
    pub interval_hours: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            // Several multiples of any sane schedule period; a duplicate
            // invocation arriving later than this is a new tick anyway
            guard_horizon_hours: 24,
            interval_hours: 6,
        }
    }
}

/// Periodic cleanup of the backing store
#[async_trait]
pub trait Maintenance: Send + Sync {
    /// Delete messages whose TTL expired before now
    ///
    /// # Returns
    /// Number of messages deleted
    async fn purge_expired_messages(&self) -> Result<i64>;

    /// Delete guard entries older than the dedup horizon
    ///
    /// # Returns
    /// Number of entries deleted
    async fn purge_stale_guard_entries(&self, horizon_hours: i64) -> Result<i64>;

    /// Run VACUUM to reclaim space
    async fn vacuum(&self) -> Result<()>;
}
