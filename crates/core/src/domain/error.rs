// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Duplicate tenant identity: {0}")]
    DuplicateTenant(String),

    #[error("Invalid schedule for tenant {tenant}: '{expr}' ({reason})")]
    InvalidSchedule {
        tenant: String,
        expr: String,
        reason: String,
    },

    #[error("Tenant not found in registry: {0}")]
    UnknownTenant(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
