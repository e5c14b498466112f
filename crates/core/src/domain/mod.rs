// Domain Layer - Pure business logic and entities

pub mod error;
pub mod message;
pub mod outcome;
pub mod tenant;
pub mod tick;

// Re-exports
pub use error::DomainError;
pub use message::{DeadLetterEnvelope, MessageTtl, QueueMessage};
pub use outcome::{DispatchOutcome, DispatchRecord, SkipReason};
pub use tenant::{
    QueueName, ScheduleName, ScheduleTimezone, Tenant, TenantBinding, TenantId, TenantSpec,
};
pub use tick::{DispatchTick, TickKey};
