use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome carried by every response and notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultKind {
    Ok,
    DataOk,
    DataInvalid,
    Invalid,
    RequestError,
    RequestBusy,
    RequestCanceled,
    MessageUndelivered,
    NotProcessed,
}

impl ResultKind {
    /// Results that carry valid data.
    pub fn is_ok(self) -> bool {
        matches!(self, ResultKind::Ok | ResultKind::DataOk)
    }

    /// Rejections of a call that must be mapped from request to response ID space.
    pub fn is_request_failure(self) -> bool {
        matches!(
            self,
            ResultKind::RequestError | ResultKind::RequestBusy | ResultKind::RequestCanceled
        )
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultKind::Ok => "OK",
            ResultKind::DataOk => "DATA_OK",
            ResultKind::DataInvalid => "DATA_INVALID",
            ResultKind::Invalid => "INVALID",
            ResultKind::RequestError => "REQUEST_ERROR",
            ResultKind::RequestBusy => "REQUEST_BUSY",
            ResultKind::RequestCanceled => "REQUEST_CANCELED",
            ResultKind::MessageUndelivered => "MESSAGE_UNDELIVERED",
            ResultKind::NotProcessed => "NOT_PROCESSED",
        };
        f.write_str(name)
    }
}

/// Subscription change requested by a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotifyRequestType {
    StartNotify,
    StopNotify,
    RemoveAllNotify,
}

/// Validity of an attribute or cached response value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataState {
    #[default]
    Unavailable,
    Ok,
    Invalid,
}

impl DataState {
    pub fn is_valid(self) -> bool {
        self == DataState::Ok
    }
}

/// Monotonic per-proxy counter correlating a request with its response.
pub type SequenceNr = u64;

/// Sequence number used for records that do not belong to a call.
pub const NO_SEQUENCE: SequenceNr = 0;
