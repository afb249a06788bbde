//! Trait seam for publishing envelopes onto the event log.

use crate::event::EventEnvelope;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors raised while publishing.
#[derive(Error, Debug)]
pub enum PublishError {
    /// The envelope could not be serialized.
    #[error("Failed to serialize envelope: {0}")]
    Serialization(String),

    /// The broker rejected the record or was unreachable.
    #[error("Failed to publish event: {0}")]
    Transport(String),
}

/// At-least-once publisher for domain event envelopes.
///
/// Records are keyed by the event's aggregate id so all events of one
/// aggregate land in one partition, in order. Cross-aggregate ordering
/// is not provided; consumers that need it use the settlement sequence
/// carried in the events themselves.
pub trait EventPublisher: Send + Sync {
    /// Publishes one envelope to `topic` and waits for broker
    /// acknowledgement.
    ///
    /// # Errors
    ///
    /// [`PublishError::Serialization`] if encoding fails,
    /// [`PublishError::Transport`] if delivery fails.
    fn publish(
        &self,
        topic: &str,
        envelope: &EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + '_>>;
}
