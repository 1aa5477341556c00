//! Message event type system

pub mod message;
pub mod types;

pub use message::{
    ConsumerId, EventKind, EventTarget, NotificationEvent, NotifyRequestEvent, RemoteEvent,
    RequestEvent, ResponseEvent, ServiceEvent,
};
pub use types::{DataState, NotifyRequestType, ResultKind, SequenceNr, NO_SEQUENCE};
