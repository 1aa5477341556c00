//! Error types for the messaging core.

use crate::event::ConsumerId;
use crate::service::MessageId;

/// Result type for messaging operations
pub type BusResult<T> = Result<T, BusError>;

/// Messaging core error types
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Payload encoding error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Payload exhausted: no more values to read")]
    PayloadExhausted,

    #[error("Message {id} is not a valid {expected} of service {service}")]
    UnexpectedMessage {
        service: String,
        id: MessageId,
        expected: &'static str,
    },

    #[error("Unknown message name: {0}")]
    UnknownName(String),

    #[error("More than {limit} {category} messages declared")]
    RangeExhausted { category: &'static str, limit: u32 },

    #[error("No consumer attached as {0}")]
    UnknownConsumer(ConsumerId),

    #[error("Endpoint already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Dispatcher {0} is not running")]
    DispatcherClosed(String),

    #[error("Dispatcher {0} did not respond within the timeout")]
    DispatcherTimeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
