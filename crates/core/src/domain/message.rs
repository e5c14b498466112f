// Queue Message Domain Model

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::tenant::{QueueName, Tenant, TenantId};
use crate::domain::tick::TickKey;

/// Message expiration policy.
///
/// `Never` is the deliberate default for trigger messages: the message means
/// "do this tenant's poll now" and must not silently vanish if the consumer is
/// briefly down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageTtl {
    #[default]
    Never,
    Bounded(Duration),
}

impl MessageTtl {
    pub fn from_seconds(seconds: Option<u64>) -> Self {
        match seconds {
            Some(s) => MessageTtl::Bounded(Duration::from_secs(s)),
            None => MessageTtl::Never,
        }
    }

    /// Bounded duration in seconds; `None` means never expires
    pub fn as_seconds(&self) -> Option<u64> {
        match self {
            MessageTtl::Never => None,
            MessageTtl::Bounded(d) => Some(d.as_secs()),
        }
    }
}

impl std::fmt::Display for MessageTtl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageTtl::Never => write!(f, "never"),
            MessageTtl::Bounded(d) => write!(f, "{}s", d.as_secs()),
        }
    }
}

/// Message handed to the queue transport.
///
/// The payload is opaque to the transport. Today it carries the tenant
/// identity; the field is reserved to later carry a richer client-config key.
///
/// The producer never sets a consumer-side visibility timeout. Where this
/// message is eventually read, the visibility timeout must exceed the
/// worst-case consumer processing time for the tenant, or the message becomes
/// re-visible and is processed twice before the first pass completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub payload: Vec<u8>,
    pub ttl: MessageTtl,
}

impl QueueMessage {
    /// Build the poll-trigger message for a tenant
    pub fn poll_trigger(tenant: &Tenant) -> Self {
        Self {
            payload: tenant.id.as_bytes().to_vec(),
            ttl: tenant.ttl,
        }
    }
}

/// Envelope persisted to the dead-letter queue for failed dispatch attempts.
///
/// Field names are part of the operator-facing wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEnvelope {
    pub original_tenant: TenantId,
    pub original_tick: TickKey,
    pub original_queue: QueueName,
    pub failure_reason: String,
    pub attempt_count: u32,
    /// Original payload, lossy-decoded for inspection and replay
    pub payload: String,
}

impl DeadLetterEnvelope {
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_round_trip_seconds() {
        assert_eq!(MessageTtl::from_seconds(None), MessageTtl::Never);
        assert_eq!(MessageTtl::Never.as_seconds(), None);

        let bounded = MessageTtl::from_seconds(Some(3600));
        assert_eq!(bounded.as_seconds(), Some(3600));
    }

    #[test]
    fn test_envelope_wire_format() {
        let envelope = DeadLetterEnvelope {
            original_tenant: "cadph".to_string(),
            original_tick: "2024-01-08T09:30Z".to_string(),
            original_queue: "polling-trigger".to_string(),
            failure_reason: "transport error".to_string(),
            attempt_count: 3,
            payload: "cadph".to_string(),
        };

        let bytes = envelope.to_payload().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["originalTenant"], "cadph");
        assert_eq!(json["attemptCount"], 3);

        let parsed = DeadLetterEnvelope::from_payload(&bytes).unwrap();
        assert_eq!(parsed.original_tick, "2024-01-08T09:30Z");
    }
}
