// Port Layer - Interfaces for external dependencies

pub mod dispatch_guard;
pub mod maintenance;
pub mod outcome_sink;
pub mod queue_producer;
pub mod time_provider; // For deterministic testing

// Re-exports
pub use dispatch_guard::{DispatchGuard, GuardError, InMemoryDispatchGuard};
pub use maintenance::{Maintenance, MaintenanceConfig};
pub use outcome_sink::{OutcomeSink, TracingOutcomeSink};
pub use queue_producer::{EnqueueError, EnqueueReceipt, QueueProducer};
pub use time_provider::{SystemTimeProvider, TimeProvider};
