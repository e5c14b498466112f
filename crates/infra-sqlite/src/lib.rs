// Polldispatch Infrastructure - SQLite Adapter
// Implements: QueueProducer (durable queue transport), DispatchGuard, Maintenance

mod connection;
mod dispatch_guard;
mod maintenance;
mod migration;
mod queue_transport;

pub use connection::create_pool;
pub use dispatch_guard::SqliteDispatchGuard;
pub use maintenance::SqliteMaintenance;
pub use migration::run_migrations;
pub use queue_transport::{SqliteQueueTransport, StoredMessage, MAX_PAYLOAD_BYTES};

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
