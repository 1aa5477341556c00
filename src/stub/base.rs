//! Interface-independent state machine of a server stub.
//!
//! Owns the attribute values, the subscription records of every proxy and the
//! outstanding calls waiting for a response. Every outgoing response is built
//! here and fanned out to the recipients through the event sink.

use crate::core::EventSink;
use crate::error::{BusError, BusResult};
use crate::event::{
    DataState, NotifyRequestEvent, NotifyRequestType, ResponseEvent, ResultKind, SequenceNr,
    ServiceEvent,
};
use crate::service::{
    MessageCategory, MessageId, Payload, ProxyAddress, ServiceDescriptor, StubAddress,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// One `(message, sequence, proxy)` record held by a stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubListener {
    pub msg_id: MessageId,
    pub seq: SequenceNr,
    pub proxy: ProxyAddress,
}

impl StubListener {
    pub fn new(msg_id: MessageId, seq: SequenceNr, proxy: ProxyAddress) -> Self {
        Self { msg_id, seq, proxy }
    }
}

#[derive(Debug, Default)]
struct AttributeSlot {
    value: Payload,
    state: DataState,
}

pub struct StubBase {
    descriptor: Arc<ServiceDescriptor>,
    address: StubAddress,
    sink: Arc<dyn EventSink>,
    attributes: HashMap<MessageId, AttributeSlot>,
    /// Subscriptions; at most one per (message, proxy).
    listeners: Vec<StubListener>,
    /// Calls waiting for a response, keyed by the response ID.
    pending: Vec<StubListener>,
    current: Option<StubListener>,
    active: bool,
}

impl StubBase {
    pub fn new(descriptor: Arc<ServiceDescriptor>, address: StubAddress, sink: Arc<dyn EventSink>) -> Self {
        let attributes = descriptor
            .attribute_ids()
            .map(|id| (id, AttributeSlot::default()))
            .collect();
        Self {
            descriptor,
            address,
            sink,
            attributes,
            listeners: Vec::new(),
            pending: Vec::new(),
            current: None,
            active: true,
        }
    }

    pub fn descriptor(&self) -> &Arc<ServiceDescriptor> {
        &self.descriptor
    }

    pub fn address(&self) -> &StubAddress {
        &self.address
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The call being executed by the handler, if any.
    pub fn current_request(&self) -> Option<&StubListener> {
        self.current.as_ref()
    }

    pub(crate) fn set_current_request(&mut self, caller: StubListener) {
        self.current = Some(caller);
    }

    pub(crate) fn clear_current_request(&mut self) {
        self.current = None;
    }

    pub fn listener_count(&self, id: MessageId) -> usize {
        self.listeners.iter().filter(|l| l.msg_id == id).count()
    }

    pub fn has_listener(&self, id: MessageId, proxy: &ProxyAddress) -> bool {
        self.listeners
            .iter()
            .any(|l| l.msg_id == id && &l.proxy == proxy)
    }

    /// Whether a call answered by `response_id` is still waiting for its response.
    pub fn is_outstanding(&self, response_id: MessageId) -> bool {
        self.pending.iter().any(|l| l.msg_id == response_id)
    }

    pub fn attribute_state(&self, id: MessageId) -> DataState {
        self.attributes
            .get(&id)
            .map(|slot| slot.state)
            .unwrap_or_default()
    }

    /// Current attribute value; `None` unless its state is `Ok`.
    pub fn attribute<T: DeserializeOwned>(&self, id: MessageId) -> Option<T> {
        let slot = self.attributes.get(&id).filter(|slot| slot.state.is_valid())?;
        slot.value.reader().read().ok()
    }

    /// Admits a call unless another caller still waits on the same response.
    ///
    /// Admitted calls with a response are recorded as outstanding; a rejected
    /// caller receives `REQUEST_BUSY` for its request ID.
    pub fn can_execute_request(
        &mut self,
        caller: &StubListener,
        response_id: MessageId,
        seq: SequenceNr,
    ) -> bool {
        if response_id == MessageId::NO_PROCEED {
            return true;
        }

        let busy = self
            .pending
            .iter()
            .any(|l| l.msg_id == response_id && l.proxy != caller.proxy);
        if busy {
            log::warn!(
                "{}: request {} from {} rejected, response {} busy",
                self.address,
                caller.msg_id,
                caller.proxy,
                response_id
            );
            self.emit(caller.proxy.clone(), ResultKind::RequestBusy, caller.msg_id, seq, Payload::new());
            return false;
        }

        self.pending
            .push(StubListener::new(response_id, seq, caller.proxy.clone()));
        true
    }

    pub fn process_notify_request(&mut self, event: NotifyRequestEvent) {
        if !self.active {
            log::debug!("{}: inactive, notify request ignored", self.address);
            return;
        }
        let source = event.source;
        let id = event.msg_id;

        match event.request {
            NotifyRequestType::RemoveAllNotify => {
                self.listeners.retain(|l| l.proxy != source);
                self.pending.retain(|l| l.proxy != source);
                log::debug!("{}: removed all records of {}", self.address, source);
            }
            NotifyRequestType::StopNotify => {
                self.listeners
                    .retain(|l| !(l.msg_id == id && l.proxy == source));
            }
            NotifyRequestType::StartNotify => {
                let category = self.descriptor.category(id);
                if !matches!(
                    category,
                    Some(
                        MessageCategory::Attribute
                            | MessageCategory::Response
                            | MessageCategory::Broadcast
                    )
                ) {
                    log::error!(
                        "{}: message {} cannot be subscribed to by {}",
                        self.address,
                        id,
                        source
                    );
                    self.emit(source, ResultKind::DataInvalid, id, event.seq, Payload::new());
                    return;
                }

                if self.has_listener(id, &source) {
                    log::warn!("{}: {} already subscribed to {}", self.address, source, id);
                    return;
                }
                self.listeners
                    .push(StubListener::new(id, event.seq, source.clone()));

                if category == Some(MessageCategory::Attribute) {
                    let (state, value) = match self.attributes.get(&id) {
                        Some(slot) => (slot.state, slot.value.clone()),
                        None => (DataState::Unavailable, Payload::new()),
                    };
                    match state {
                        DataState::Ok => self.emit(source, ResultKind::DataOk, id, event.seq, value),
                        DataState::Invalid => {
                            self.emit(source, ResultKind::DataInvalid, id, event.seq, Payload::new())
                        }
                        DataState::Unavailable => {}
                    }
                }
            }
        }
    }

    /// Stores a new attribute value and notifies subscribers when it changed
    /// or was not valid before.
    pub fn set_attribute<T: Serialize + ?Sized>(&mut self, id: MessageId, value: &T) -> BusResult<()> {
        let value = Payload::of(value)?;
        let slot = match self.attributes.get_mut(&id) {
            Some(slot) => slot,
            None => {
                log::error!("{}: {} is not an attribute", self.address, id);
                return Err(self.unexpected(id, MessageCategory::Attribute));
            }
        };

        if slot.state == DataState::Ok && slot.value == value {
            return Ok(());
        }
        slot.value = value;
        slot.state = DataState::Ok;
        self.send_notification(id);
        Ok(())
    }

    /// Marks an attribute invalid and tells its subscribers.
    pub fn invalidate_attribute(&mut self, id: MessageId) {
        self.error_request(id, false);
    }

    /// Sends the current attribute value to every subscriber.
    pub fn send_notification(&mut self, id: MessageId) -> usize {
        let (result, payload) = match self.attributes.get(&id) {
            Some(slot) if slot.state == DataState::Ok => (ResultKind::DataOk, slot.value.clone()),
            Some(_) => (ResultKind::DataInvalid, Payload::new()),
            None => {
                log::error!("{}: notification for unknown attribute {}", self.address, id);
                return 0;
            }
        };
        let recipients = self.subscribers(id);
        self.fan_out(result, id, payload, recipients)
    }

    /// Answers every caller waiting on response `id` (and its subscribers).
    pub fn send_response(&mut self, id: MessageId, payload: Payload) -> usize {
        if !self.descriptor.is_category(id, MessageCategory::Response) {
            log::error!("{}: {} is not a response", self.address, id);
            return 0;
        }
        let recipients = self.take_recipients(id);
        if recipients.is_empty() {
            log::debug!("{}: nobody waits for response {}", self.address, id);
        }
        self.fan_out(ResultKind::DataOk, id, payload, recipients)
    }

    pub fn send_broadcast(&mut self, id: MessageId, payload: Payload) -> usize {
        self.send_update(id, payload, ResultKind::DataOk)
    }

    /// Sends a response-shaped update to every subscriber of `id`.
    pub fn send_update(&mut self, id: MessageId, payload: Payload, result: ResultKind) -> usize {
        match self.descriptor.category(id) {
            Some(MessageCategory::Response | MessageCategory::Broadcast) => {}
            _ => {
                log::error!("{}: {} cannot be sent as an update", self.address, id);
                return 0;
            }
        }
        let recipients = self.subscribers(id);
        self.fan_out(result, id, payload, recipients)
    }

    /// Reports a failure for `id` to whoever listens on it.
    ///
    /// Attributes become invalid (`DATA_INVALID`), responses and broadcasts
    /// get `INVALID`, and requests resolve to their response ID and report
    /// `REQUEST_CANCELED` or `REQUEST_ERROR`. Requests without a response
    /// produce nothing.
    pub fn error_request(&mut self, id: MessageId, cancel: bool) {
        match self.descriptor.category(id) {
            Some(MessageCategory::Attribute) => {
                if let Some(slot) = self.attributes.get_mut(&id) {
                    slot.state = DataState::Invalid;
                    slot.value = Payload::new();
                }
                let recipients = self.subscribers(id);
                self.fan_out(ResultKind::DataInvalid, id, Payload::new(), recipients);
            }
            Some(MessageCategory::Response | MessageCategory::Broadcast) => {
                let recipients = self.take_recipients(id);
                self.fan_out(ResultKind::Invalid, id, Payload::new(), recipients);
            }
            Some(MessageCategory::Request) => {
                let response_id = self.descriptor.response_of(id);
                if response_id == MessageId::NO_PROCEED {
                    log::debug!("{}: request {} failed, no response to report", self.address, id);
                    return;
                }
                let result = if cancel {
                    ResultKind::RequestCanceled
                } else {
                    ResultKind::RequestError
                };
                let recipients = self.take_recipients(response_id);
                self.fan_out(result, id, Payload::new(), recipients);
            }
            None => {
                log::error!("{}: error reported for unknown message {}", self.address, id);
            }
        }
    }

    /// Cancels outstanding calls and drops every record; the stub stays inert afterwards.
    pub(crate) fn shutdown(&mut self) {
        for call in std::mem::take(&mut self.pending) {
            self.emit(call.proxy, ResultKind::RequestCanceled, call.msg_id, call.seq, Payload::new());
        }
        self.listeners.clear();
        self.current = None;
        self.active = false;
        log::debug!("{}: shut down", self.address);
    }

    pub(crate) fn unexpected(&self, id: MessageId, expected: MessageCategory) -> BusError {
        BusError::UnexpectedMessage {
            service: self.descriptor.name().to_string(),
            id,
            expected: expected.as_str(),
        }
    }

    fn subscribers(&self, id: MessageId) -> Vec<(ProxyAddress, SequenceNr)> {
        self.listeners
            .iter()
            .filter(|l| l.msg_id == id)
            .map(|l| (l.proxy.clone(), l.seq))
            .collect()
    }

    /// Outstanding calls on `id` (consumed) followed by subscribers not already covered.
    fn take_recipients(&mut self, id: MessageId) -> Vec<(ProxyAddress, SequenceNr)> {
        let (calls, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|l| l.msg_id == id);
        self.pending = rest;

        let mut recipients: Vec<(ProxyAddress, SequenceNr)> =
            calls.into_iter().map(|l| (l.proxy, l.seq)).collect();
        for (proxy, seq) in self.subscribers(id) {
            if !recipients.iter().any(|(p, _)| p == &proxy) {
                recipients.push((proxy, seq));
            }
        }
        recipients
    }

    fn fan_out(
        &self,
        result: ResultKind,
        id: MessageId,
        payload: Payload,
        recipients: Vec<(ProxyAddress, SequenceNr)>,
    ) -> usize {
        let mut recipients = recipients.into_iter();
        let Some((first, first_seq)) = recipients.next() else {
            return 0;
        };
        let template = ResponseEvent::new(self.address.clone(), first, result, id, first_seq, payload);
        let mut sent = 0;
        for (proxy, seq) in recipients {
            sent += self.post(template.clone_for(proxy, seq));
        }
        sent + self.post(template)
    }

    fn emit(&self, target: ProxyAddress, result: ResultKind, id: MessageId, seq: SequenceNr, payload: Payload) {
        self.post(ResponseEvent::new(self.address.clone(), target, result, id, seq, payload));
    }

    fn post(&self, event: ResponseEvent) -> usize {
        if !self.active {
            log::debug!("{}: inactive, response {} dropped", self.address, event.msg_id);
            return 0;
        }
        self.sink.post_event(ServiceEvent::Response(event));
        1
    }
}
