//! Typed error handling for consumer delivery.
//!
//! Only genuine failures are errors. Backpressure (no credit, stopped or
//! transferring consumer, an active chunked transfer) is reported through
//! [`HandleStatus::Busy`](crate::HandleStatus::Busy) and filter mismatches
//! through [`HandleStatus::NoMatch`](crate::HandleStatus::NoMatch).

use std::io;

use thiserror::Error;

/// Errors raised by a [`DeliveryEngine`](crate::DeliveryEngine).
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// An acknowledgement or removal named a message this consumer never
    /// delivered, or delivered and already settled.
    #[error(
        "Could not find reference on consumer {consumer_id}: message {message_id}, queue {queue}, closed = {closed}"
    )]
    ReferenceNotFound {
        consumer_id: u64,
        message_id: u64,
        queue: String,
        closed: bool,
    },

    /// The ledger already holds an in-flight reference for this message.
    #[error("Message {message_id} is already in flight on consumer {consumer_id}")]
    DuplicateReference { consumer_id: u64, message_id: u64 },

    /// Credit values below `-1` have no meaning.
    #[error("Invalid credit value: {0}")]
    InvalidCredits(i32),

    /// The large-body encoder failed while streaming.
    #[error("Large message encoder error: {0}")]
    Encoder(#[from] io::Error),

    /// A queue, storage or management collaborator failed.
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl ConsumerError {
    /// Returns `true` for errors that mean a delivery was lost or duplicated.
    ///
    /// These must be surfaced to the client as a session-level failure.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::ReferenceNotFound { .. } | Self::DuplicateReference { .. }
        )
    }
}

pub type Result<T, E = ConsumerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_not_found_display() {
        let err = ConsumerError::ReferenceNotFound {
            consumer_id: 7,
            message_id: 42,
            queue: "orders".to_string(),
            closed: false,
        };

        assert_eq!(
            err.to_string(),
            "Could not find reference on consumer 7: message 42, queue orders, closed = false"
        );
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn test_classification() {
        assert!(
            ConsumerError::DuplicateReference {
                consumer_id: 1,
                message_id: 2
            }
            .is_protocol_violation()
        );
        assert!(!ConsumerError::InvalidCredits(-5).is_protocol_violation());
        assert!(
            !ConsumerError::Encoder(io::Error::new(io::ErrorKind::UnexpectedEof, "short read"))
                .is_protocol_violation()
        );
        assert!(!ConsumerError::from(anyhow::anyhow!("journal offline")).is_protocol_violation());
    }
}
