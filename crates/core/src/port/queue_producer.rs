// Queue Producer Port
// Abstraction over the durable queue transport (write side only)

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::QueueMessage;

/// Identifiers returned by the transport for a successful enqueue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueReceipt {
    pub message_id: String,
    pub request_id: String,
}

/// Enqueue failure classification.
///
/// Transport failures (network, auth, throttling) are retryable by the
/// caller; malformed messages are not and go straight to the dead-letter
/// path. The producer itself never retries - retry policy lives with the
/// Dispatcher so idempotency decisions stay centralized.
#[derive(Error, Debug, Clone)]
pub enum EnqueueError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed message: {0}")]
    Malformed(String),
}

impl EnqueueError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EnqueueError::Transport(_))
    }
}

/// Write-side queue interface.
///
/// One call is one logical round-trip to the transport. Consumer-side
/// visibility timeout is configured where the message is read, never here.
#[async_trait]
pub trait QueueProducer: Send + Sync {
    /// Enqueue a message onto the named queue, honoring its TTL exactly:
    /// `MessageTtl::Never` must reach the transport with no expiration at all.
    async fn enqueue(
        &self,
        queue: &str,
        message: &QueueMessage,
    ) -> Result<EnqueueReceipt, EnqueueError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::MessageTtl;
    use std::sync::{Arc, Mutex};

    /// Mock producer behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed
        Success,
        /// Always fail with a transport error
        TransportFail(String),
        /// Fail with a transport error N times, then succeed
        TransportFailTimes(usize, String),
        /// Always fail with a malformed-message error
        MalformedFail(String),
        /// Fail malformed only for the given payload, succeed otherwise
        MalformedForPayload(Vec<u8>, String),
    }

    /// One recorded enqueue call
    #[derive(Debug, Clone)]
    pub struct RecordedEnqueue {
        pub queue: String,
        pub payload: Vec<u8>,
        pub ttl: MessageTtl,
    }

    /// Mock Queue Producer for testing
    pub struct MockQueueProducer {
        behavior: MockBehavior,
        calls: Arc<Mutex<Vec<RecordedEnqueue>>>,
        failures_seen: Arc<Mutex<usize>>,
    }

    impl MockQueueProducer {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior,
                calls: Arc::new(Mutex::new(Vec::new())),
                failures_seen: Arc::new(Mutex::new(0)),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }

        pub fn new_transport_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::TransportFail(message.into()))
        }

        pub fn new_malformed(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::MalformedFail(message.into()))
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn calls(&self) -> Vec<RecordedEnqueue> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl QueueProducer for MockQueueProducer {
        async fn enqueue(
            &self,
            queue: &str,
            message: &QueueMessage,
        ) -> Result<EnqueueReceipt, EnqueueError> {
            let call_index = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(RecordedEnqueue {
                    queue: queue.to_string(),
                    payload: message.payload.clone(),
                    ttl: message.ttl,
                });
                calls.len()
            };

            match &self.behavior {
                MockBehavior::Success => {}
                MockBehavior::TransportFail(reason) => {
                    return Err(EnqueueError::Transport(reason.clone()));
                }
                MockBehavior::TransportFailTimes(times, reason) => {
                    let mut seen = self.failures_seen.lock().unwrap();
                    if *seen < *times {
                        *seen += 1;
                        return Err(EnqueueError::Transport(reason.clone()));
                    }
                }
                MockBehavior::MalformedFail(reason) => {
                    return Err(EnqueueError::Malformed(reason.clone()));
                }
                MockBehavior::MalformedForPayload(payload, reason) => {
                    if message.payload == *payload {
                        return Err(EnqueueError::Malformed(reason.clone()));
                    }
                }
            }

            Ok(EnqueueReceipt {
                message_id: format!("msg-{}", call_index),
                request_id: format!("req-{}", call_index),
            })
        }
    }
}
