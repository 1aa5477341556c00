//! Message events exchanged between proxies and stubs.
//!
//! Dispatch is driven by the event kind alone. Interface specifics live in the
//! payload, so the same four types serve every service. Request, notify-request
//! and response events are serialisable and travel through the router as a
//! [`RemoteEvent`]; notifications never leave their process.

use super::types::{NotifyRequestType, ResultKind, SequenceNr, NO_SEQUENCE};
use crate::error::BusResult;
use crate::service::{MessageId, Payload, ProxyAddress, StubAddress};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};

/// Handle of a notification consumer attached to a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub u64);

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer#{}", self.0)
    }
}

/// A call issued by a proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEvent {
    pub source: ProxyAddress,
    pub target: StubAddress,
    pub msg_id: MessageId,
    pub seq: SequenceNr,
    pub payload: Payload,
    /// False for calls declared without a response.
    #[serde(default = "answered")]
    pub expects_response: bool,
}

fn answered() -> bool {
    true
}

impl RequestEvent {
    pub fn new(
        source: ProxyAddress,
        target: StubAddress,
        msg_id: MessageId,
        seq: SequenceNr,
        payload: Payload,
    ) -> Self {
        Self {
            source,
            target,
            msg_id,
            seq,
            payload,
            expects_response: true,
        }
    }

    pub fn expecting_response(mut self, expected: bool) -> Self {
        self.expects_response = expected;
        self
    }
}

/// A subscription change issued by a proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyRequestEvent {
    pub source: ProxyAddress,
    pub target: StubAddress,
    pub msg_id: MessageId,
    pub seq: SequenceNr,
    pub request: NotifyRequestType,
}

impl NotifyRequestEvent {
    pub fn new(
        source: ProxyAddress,
        target: StubAddress,
        msg_id: MessageId,
        request: NotifyRequestType,
    ) -> Self {
        Self {
            source,
            target,
            msg_id,
            seq: NO_SEQUENCE,
            request,
        }
    }

    /// Drops every subscription `source` holds on `target`.
    pub fn remove_all(source: ProxyAddress, target: StubAddress) -> Self {
        Self::new(source, target, MessageId::NO_PROCEED, NotifyRequestType::RemoveAllNotify)
    }
}

/// Answer, update or rejection addressed to one proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEvent {
    pub source: StubAddress,
    pub target: ProxyAddress,
    pub result: ResultKind,
    pub msg_id: MessageId,
    pub seq: SequenceNr,
    pub payload: Payload,
}

impl ResponseEvent {
    pub fn new(
        source: StubAddress,
        target: ProxyAddress,
        result: ResultKind,
        msg_id: MessageId,
        seq: SequenceNr,
        payload: Payload,
    ) -> Self {
        Self {
            source,
            target,
            result,
            msg_id,
            seq,
            payload,
        }
    }

    /// Copy of this response retargeted to another proxy, content preserved.
    pub fn clone_for(&self, target: ProxyAddress, seq: SequenceNr) -> Self {
        Self {
            target,
            seq,
            ..self.clone()
        }
    }
}

/// Local trigger for a consumer callback on the proxy's dispatcher thread.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub proxy: ProxyAddress,
    pub consumer: ConsumerId,
    pub msg_id: MessageId,
    pub result: ResultKind,
    pub seq: SequenceNr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Request,
    NotifyRequest,
    Response,
    Notification,
}

/// Endpoint an event is delivered to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventTarget {
    Stub(StubAddress),
    Proxy(ProxyAddress),
}

impl fmt::Display for EventTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTarget::Stub(address) => write!(f, "stub {}", address),
            EventTarget::Proxy(address) => write!(f, "proxy {}", address),
        }
    }
}

/// Closed set of events a dispatcher delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    Request(RequestEvent),
    NotifyRequest(NotifyRequestEvent),
    Response(ResponseEvent),
    Notification(NotificationEvent),
}

impl ServiceEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServiceEvent::Request(_) => EventKind::Request,
            ServiceEvent::NotifyRequest(_) => EventKind::NotifyRequest,
            ServiceEvent::Response(_) => EventKind::Response,
            ServiceEvent::Notification(_) => EventKind::Notification,
        }
    }

    pub fn target(&self) -> EventTarget {
        match self {
            ServiceEvent::Request(event) => EventTarget::Stub(event.target.clone()),
            ServiceEvent::NotifyRequest(event) => EventTarget::Stub(event.target.clone()),
            ServiceEvent::Response(event) => EventTarget::Proxy(event.target.clone()),
            ServiceEvent::Notification(event) => EventTarget::Proxy(event.proxy.clone()),
        }
    }

    pub fn msg_id(&self) -> MessageId {
        match self {
            ServiceEvent::Request(event) => event.msg_id,
            ServiceEvent::NotifyRequest(event) => event.msg_id,
            ServiceEvent::Response(event) => event.msg_id,
            ServiceEvent::Notification(event) => event.msg_id,
        }
    }
}

/// Events that may cross a process boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "event")]
pub enum RemoteEvent {
    Request(RequestEvent),
    NotifyRequest(NotifyRequestEvent),
    Response(ResponseEvent),
}

impl RemoteEvent {
    /// Writes the event as one self-delimiting JSON document.
    pub fn write_to<W: Write>(&self, writer: W) -> BusResult<()> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Reconstructs an event previously written with [`write_to`](Self::write_to).
    pub fn read_from<R: Read>(reader: R) -> BusResult<Self> {
        Ok(serde_json::from_reader(reader)?)
    }
}

impl From<RemoteEvent> for ServiceEvent {
    fn from(event: RemoteEvent) -> Self {
        match event {
            RemoteEvent::Request(event) => ServiceEvent::Request(event),
            RemoteEvent::NotifyRequest(event) => ServiceEvent::NotifyRequest(event),
            RemoteEvent::Response(event) => ServiceEvent::Response(event),
        }
    }
}

impl TryFrom<ServiceEvent> for RemoteEvent {
    type Error = NotificationEvent;

    /// Notifications are process-local and are handed back unchanged.
    fn try_from(event: ServiceEvent) -> Result<Self, Self::Error> {
        match event {
            ServiceEvent::Request(event) => Ok(RemoteEvent::Request(event)),
            ServiceEvent::NotifyRequest(event) => Ok(RemoteEvent::NotifyRequest(event)),
            ServiceEvent::Response(event) => Ok(RemoteEvent::Response(event)),
            ServiceEvent::Notification(event) => Err(event),
        }
    }
}
