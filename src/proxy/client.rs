//! Client side state machine: call correlation, cached data and subscriptions.

use super::consumer::{PendingCall, SharedNotificationConsumer, Subscription};
use crate::core::{DispatcherHandle, EventConsumer, EventSink, Registration, ServiceDirectory};
use crate::error::{BusError, BusResult};
use crate::event::{
    ConsumerId, DataState, EventKind, EventTarget, NotificationEvent, NotifyRequestEvent,
    NotifyRequestType, RequestEvent, ResponseEvent, ResultKind, SequenceNr, ServiceEvent,
};
use crate::service::{
    MessageCategory, MessageId, Payload, PayloadReader, ProxyAddress, ServiceDescriptor,
};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Last value received for one message, with the result that delivered it.
#[derive(Debug, Clone)]
struct CachedData {
    payload: Payload,
    state: DataState,
    result: ResultKind,
    seq: SequenceNr,
}

pub struct Proxy {
    descriptor: Arc<ServiceDescriptor>,
    address: ProxyAddress,
    sink: Arc<dyn EventSink>,
    last_seq: SequenceNr,
    next_consumer: u64,
    consumers: HashMap<ConsumerId, SharedNotificationConsumer>,
    subscriptions: HashMap<MessageId, Vec<Subscription>>,
    awaiting: Vec<PendingCall>,
    cache: HashMap<MessageId, CachedData>,
    active: bool,
}

impl Proxy {
    pub fn new(descriptor: Arc<ServiceDescriptor>, address: ProxyAddress, sink: Arc<dyn EventSink>) -> Self {
        Self {
            descriptor,
            address,
            sink,
            last_seq: 0,
            next_consumer: 1,
            consumers: HashMap::new(),
            subscriptions: HashMap::new(),
            awaiting: Vec::new(),
            cache: HashMap::new(),
            active: true,
        }
    }

    /// Creates the proxy for `role` owned by the dispatcher's thread.
    ///
    /// Only one proxy per service, role and thread may exist at a time. The
    /// address carries the directory's channel.
    pub fn startup(
        descriptor: Arc<ServiceDescriptor>,
        role: &str,
        dispatcher: &DispatcherHandle,
        directory: &Arc<ServiceDirectory>,
    ) -> BusResult<ProxyHandle> {
        let address =
            ProxyAddress::new(descriptor.name(), role, dispatcher.name()).on_channel(directory.channel());
        let sink: Arc<dyn EventSink> = directory.clone();
        let proxy = Arc::new(Mutex::new(Proxy::new(descriptor, address.clone(), sink)));

        directory.attach_dispatcher(dispatcher);
        let registration = dispatcher.register(
            &[EventKind::Response, EventKind::Notification],
            EventTarget::Proxy(address.clone()),
            proxy.clone(),
        )?;
        directory.register_proxy(&address)?;
        log::info!("Proxy {} started", address);

        Ok(ProxyHandle {
            proxy,
            address,
            dispatcher: dispatcher.clone(),
            directory: directory.clone(),
            registration: Some(registration),
        })
    }

    pub fn descriptor(&self) -> &Arc<ServiceDescriptor> {
        &self.descriptor
    }

    pub fn address(&self) -> &ProxyAddress {
        &self.address
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Sequence number of the most recent request, 0 before the first.
    pub fn last_sequence(&self) -> SequenceNr {
        self.last_seq
    }

    pub fn attach_consumer(&mut self, consumer: SharedNotificationConsumer) -> ConsumerId {
        let id = ConsumerId(self.next_consumer);
        self.next_consumer += 1;
        self.consumers.insert(id, consumer);
        id
    }

    /// Removes the consumer together with its subscriptions and pending calls.
    pub fn detach_consumer(&mut self, consumer: ConsumerId) {
        self.clear_all_notifications(consumer);
        self.awaiting.retain(|call| call.consumer != consumer);
        self.consumers.remove(&consumer);
    }

    /// Issues a call and returns its sequence number.
    ///
    /// `consumer` is notified once the call is answered or rejected; calls
    /// without a response never notify.
    pub fn send_request(
        &mut self,
        id: MessageId,
        payload: Payload,
        consumer: Option<ConsumerId>,
    ) -> BusResult<SequenceNr> {
        if !self.descriptor.is_category(id, MessageCategory::Request) {
            log::error!("{}: {} is not a request", self.address, id);
            return Err(self.unexpected(id, MessageCategory::Request));
        }
        if let Some(consumer) = consumer {
            self.require_consumer(consumer)?;
        }

        self.last_seq += 1;
        let seq = self.last_seq;
        let response_id = self.descriptor.response_of(id);
        if let Some(consumer) = consumer.filter(|_| response_id != MessageId::NO_PROCEED) {
            self.awaiting.push(PendingCall {
                response_id,
                seq,
                consumer,
            });
        }

        let request = RequestEvent::new(self.address.clone(), self.address.stub(), id, seq, payload)
            .expecting_response(response_id != MessageId::NO_PROCEED);
        self.sink.post_event(ServiceEvent::Request(request));
        Ok(seq)
    }

    /// Subscribes `consumer` to updates of `id`.
    ///
    /// The stub is asked only for the first subscriber of an ID; later
    /// subscribers get the cached value. With `notify_always` an existing
    /// subscription is re-notified with the cached value.
    pub fn set_notification(&mut self, id: MessageId, consumer: ConsumerId, notify_always: bool) -> BusResult<()> {
        match self.descriptor.category(id) {
            Some(MessageCategory::Attribute | MessageCategory::Response | MessageCategory::Broadcast) => {}
            _ => {
                log::error!("{}: {} cannot be subscribed to", self.address, id);
                return Err(self.unexpected(id, MessageCategory::Attribute));
            }
        }
        self.require_consumer(consumer)?;

        let subscriptions = self.subscriptions.entry(id).or_default();
        if let Some(existing) = subscriptions.iter_mut().find(|s| s.consumer == consumer) {
            existing.notify_always = notify_always;
            if notify_always {
                self.redeliver(id, consumer);
            }
            return Ok(());
        }

        let first = subscriptions.is_empty();
        subscriptions.push(Subscription {
            consumer,
            notify_always,
        });
        if first {
            self.post_notify_request(id, NotifyRequestType::StartNotify);
        } else {
            self.redeliver(id, consumer);
        }
        Ok(())
    }

    pub fn clear_notification(&mut self, id: MessageId, consumer: ConsumerId) {
        let Some(subscriptions) = self.subscriptions.get_mut(&id) else {
            return;
        };
        let before = subscriptions.len();
        subscriptions.retain(|s| s.consumer != consumer);
        if subscriptions.is_empty() {
            self.subscriptions.remove(&id);
            if before > 0 {
                self.post_notify_request(id, NotifyRequestType::StopNotify);
            }
        }
    }

    pub fn clear_all_notifications(&mut self, consumer: ConsumerId) {
        let ids: Vec<MessageId> = self
            .subscriptions
            .iter()
            .filter(|(_, subs)| subs.iter().any(|s| s.consumer == consumer))
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.clear_notification(id, consumer);
        }
    }

    pub fn is_subscribed(&self, id: MessageId, consumer: ConsumerId) -> bool {
        self.subscriptions
            .get(&id)
            .is_some_and(|subs| subs.iter().any(|s| s.consumer == consumer))
    }

    pub fn subscriber_count(&self, id: MessageId) -> usize {
        self.subscriptions.get(&id).map_or(0, Vec::len)
    }

    pub fn data_state(&self, id: MessageId) -> DataState {
        self.cache.get(&id).map(|data| data.state).unwrap_or_default()
    }

    /// Cached attribute value; `None` unless its state is `Ok`.
    pub fn attribute<T: DeserializeOwned>(&self, id: MessageId) -> Option<T> {
        self.data(id)?.read().ok()
    }

    /// Reader over the cached parameters of `id`, available only while valid.
    pub fn data(&self, id: MessageId) -> Option<PayloadReader<'_>> {
        self.cache
            .get(&id)
            .filter(|data| data.state.is_valid())
            .map(|data| data.payload.reader())
    }

    pub fn process_response(&mut self, event: ResponseEvent) {
        if event.target != self.address {
            log::error!("{}: response addressed to {}", self.address, event.target);
            return;
        }

        let translate = event.result.is_request_failure() || event.result == ResultKind::MessageUndelivered;
        let resolved = if translate && self.descriptor.is_category(event.msg_id, MessageCategory::Request) {
            self.descriptor.response_of(event.msg_id)
        } else {
            event.msg_id
        };
        if resolved == MessageId::NO_PROCEED {
            log::debug!("{}: {} for {} has no response to update", self.address, event.result, event.msg_id);
            return;
        }
        let Some(category) = self.descriptor.category(resolved) else {
            log::error!("{}: response with unknown message {}", self.address, resolved);
            return;
        };
        if category == MessageCategory::Request {
            log::error!("{}: response carries request {}", self.address, resolved);
            return;
        }

        let valid = event.result.is_ok();
        if valid {
            if let Some(arity) = self.descriptor.arity(resolved) {
                let found = event.payload.value_count();
                if found != arity {
                    log::warn!(
                        "{}: {} carries {} values, expected {}",
                        self.address,
                        self.descriptor.name_of(resolved).unwrap_or("?"),
                        found,
                        arity
                    );
                }
            }
        }
        self.cache.insert(
            resolved,
            CachedData {
                payload: if valid { event.payload } else { Payload::new() },
                state: if valid { DataState::Ok } else { DataState::Invalid },
                result: event.result,
                seq: event.seq,
            },
        );

        let mut recipients: Vec<ConsumerId> = Vec::new();
        self.awaiting.retain(|call| {
            let answered = call.response_id == resolved && call.seq == event.seq;
            if answered {
                recipients.push(call.consumer);
            }
            !answered
        });
        for subscription in self.subscriptions.get(&resolved).into_iter().flatten() {
            if !recipients.contains(&subscription.consumer) {
                recipients.push(subscription.consumer);
            }
        }
        for consumer in recipients {
            self.notify(consumer, resolved, event.result, event.seq);
        }
    }

    /// Drops every subscription at the stub and forgets all consumers.
    pub(crate) fn shutdown(&mut self) {
        if !self.subscriptions.is_empty() {
            self.sink.post_event(ServiceEvent::NotifyRequest(NotifyRequestEvent::remove_all(
                self.address.clone(),
                self.address.stub(),
            )));
        }
        self.subscriptions.clear();
        self.awaiting.clear();
        self.consumers.clear();
        self.active = false;
        log::debug!("{}: shut down", self.address);
    }

    fn process_notification(&mut self, event: NotificationEvent) {
        let Some(consumer) = self.consumers.get(&event.consumer).cloned() else {
            log::debug!("{}: {} detached, notification dropped", self.address, event.consumer);
            return;
        };
        let mut consumer = consumer.lock().unwrap_or_else(PoisonError::into_inner);
        consumer.on_notification(self, &event);
    }

    fn redeliver(&self, id: MessageId, consumer: ConsumerId) {
        match self.cache.get(&id) {
            Some(data) if data.state != DataState::Unavailable => {
                self.notify(consumer, id, data.result, data.seq);
            }
            _ => {}
        }
    }

    fn notify(&self, consumer: ConsumerId, id: MessageId, result: ResultKind, seq: SequenceNr) {
        if !self.active {
            return;
        }
        self.sink.post_event(ServiceEvent::Notification(NotificationEvent {
            proxy: self.address.clone(),
            consumer,
            msg_id: id,
            result,
            seq,
        }));
    }

    fn post_notify_request(&self, id: MessageId, request: NotifyRequestType) {
        self.sink.post_event(ServiceEvent::NotifyRequest(NotifyRequestEvent::new(
            self.address.clone(),
            self.address.stub(),
            id,
            request,
        )));
    }

    fn require_consumer(&self, consumer: ConsumerId) -> BusResult<()> {
        if self.consumers.contains_key(&consumer) {
            Ok(())
        } else {
            Err(BusError::UnknownConsumer(consumer))
        }
    }

    fn unexpected(&self, id: MessageId, expected: MessageCategory) -> BusError {
        BusError::UnexpectedMessage {
            service: self.descriptor.name().to_string(),
            id,
            expected: expected.as_str(),
        }
    }
}

impl EventConsumer for Proxy {
    fn process_event(&mut self, event: ServiceEvent) {
        if !self.active {
            log::debug!("{}: inactive, {:?} event dropped", self.address, event.kind());
            return;
        }
        match event {
            ServiceEvent::Response(event) => self.process_response(event),
            ServiceEvent::Notification(event) => self.process_notification(event),
            other => log::error!("{}: unexpected {:?} event", self.address, other.kind()),
        }
    }
}

/// Owner of a started proxy. Dropping it shuts the proxy down.
pub struct ProxyHandle {
    proxy: Arc<Mutex<Proxy>>,
    address: ProxyAddress,
    dispatcher: DispatcherHandle,
    directory: Arc<ServiceDirectory>,
    registration: Option<Registration>,
}

impl ProxyHandle {
    pub fn address(&self) -> &ProxyAddress {
        &self.address
    }

    /// Read-only view of the cache and subscriptions from any thread.
    pub fn inspect(&self) -> ProxyView<'_> {
        ProxyView(self.proxy.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Runs `task` against the proxy on its dispatcher thread.
    pub fn execute<F>(&self, task: F) -> BusResult<()>
    where
        F: FnOnce(&mut Proxy) + Send + 'static,
    {
        let proxy = self.proxy.clone();
        self.dispatcher.execute(move || {
            let mut proxy = proxy.lock().unwrap_or_else(PoisonError::into_inner);
            task(&mut proxy);
        })
    }

    pub fn shutdown(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(registration) = self.registration.take() else {
            return;
        };
        self.proxy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutdown();
        self.directory.unregister_proxy(&self.address);
        drop(registration);
        log::info!("Proxy {} stopped", self.address);
    }
}

pub struct ProxyView<'a>(MutexGuard<'a, Proxy>);

impl Deref for ProxyView<'_> {
    type Target = Proxy;

    fn deref(&self) -> &Proxy {
        &self.0
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{ServiceKind, StubAddress, Version};
    use tokio::sync::mpsc;

    struct Fixture {
        proxy: Proxy,
        events: mpsc::UnboundedReceiver<ServiceEvent>,
    }

    impl Fixture {
        fn new() -> Self {
            let descriptor = ServiceDescriptor::builder("Chat", Version::new(1, 0, 0), ServiceKind::Remote)
                .response("ResponseConnect", 3)
                .broadcast("BroadcastMessage", 2)
                .request("RequestConnect", Some("ResponseConnect"))
                .request("RequestDisconnect", None)
                .attribute("Participants")
                .build()
                .unwrap();
            let (tx, events) = mpsc::unbounded_channel();
            let proxy = Proxy::new(descriptor, ProxyAddress::new("Chat", "main", "ui"), Arc::new(tx));
            Self { proxy, events }
        }

        fn id(&self, name: &str) -> MessageId {
            self.proxy.descriptor().id_of(name)
        }

        fn consumer(&mut self) -> ConsumerId {
            self.proxy
                .attach_consumer(Arc::new(Mutex::new(|_: &mut Proxy, _: &NotificationEvent| {})))
        }

        fn drain(&mut self) -> Vec<ServiceEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        fn notifications(&mut self) -> Vec<NotificationEvent> {
            self.drain()
                .into_iter()
                .filter_map(|event| match event {
                    ServiceEvent::Notification(n) => Some(n),
                    _ => None,
                })
                .collect()
        }

        fn respond(&mut self, result: ResultKind, msg_id: MessageId, seq: SequenceNr, payload: Payload) {
            let event = ResponseEvent::new(
                StubAddress::new("Chat", "main"),
                self.proxy.address().clone(),
                result,
                msg_id,
                seq,
                payload,
            );
            self.proxy.process_event(ServiceEvent::Response(event));
        }
    }

    fn connect_payload() -> Payload {
        let mut payload = Payload::new();
        payload.write("alice").unwrap().write(&7).unwrap().write("Accepted").unwrap();
        payload
    }

    #[test]
    fn test_sequence_numbers_strictly_increase() {
        let mut f = Fixture::new();
        let disconnect = f.id("RequestDisconnect");
        let mut previous = 0;
        for _ in 0..20 {
            let seq = f.proxy.send_request(disconnect, Payload::new(), None).unwrap();
            assert!(seq > previous);
            previous = seq;
        }
        assert_eq!(f.proxy.last_sequence(), 20);
        let requests = f.drain();
        assert_eq!(requests.len(), 20);
        assert!(requests
            .iter()
            .all(|event| matches!(event, ServiceEvent::Request(r) if !r.expects_response)));
    }

    #[test]
    fn test_response_notifies_waiting_consumer() {
        let mut f = Fixture::new();
        let consumer = f.consumer();
        let connect = f.id("RequestConnect");
        let response = f.id("ResponseConnect");

        let seq = f.proxy
            .send_request(connect, Payload::of("alice").unwrap(), Some(consumer))
            .unwrap();
        assert_eq!(seq, 1);
        match &f.drain()[..] {
            [ServiceEvent::Request(request)] => {
                assert_eq!(request.msg_id, connect);
                assert_eq!(request.target, StubAddress::new("Chat", "main"));
                assert!(request.expects_response);
            }
            other => panic!("Unexpected events: {:?}", other),
        }

        f.respond(ResultKind::DataOk, response, seq, connect_payload());
        assert_eq!(f.proxy.data_state(response), DataState::Ok);
        let mut reader = f.proxy.data(response).unwrap();
        assert_eq!(reader.read::<String>().unwrap(), "alice");
        assert_eq!(reader.read::<u32>().unwrap(), 7);

        let notifications = f.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].consumer, consumer);
        assert_eq!(notifications[0].msg_id, response);
        assert_eq!(notifications[0].result, ResultKind::DataOk);
        assert_eq!(notifications[0].seq, 1);

        // answered calls are forgotten
        f.respond(ResultKind::DataOk, response, seq, connect_payload());
        assert!(f.notifications().is_empty());
    }

    #[test]
    fn test_busy_translated_to_response_id() {
        let mut f = Fixture::new();
        let consumer = f.consumer();
        let connect = f.id("RequestConnect");
        let seq = f.proxy.send_request(connect, Payload::new(), Some(consumer)).unwrap();
        f.drain();

        f.respond(ResultKind::RequestBusy, connect, seq, Payload::new());
        let response = f.id("ResponseConnect");
        assert_eq!(f.proxy.data_state(response), DataState::Invalid);
        let notifications = f.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].msg_id, response);
        assert_eq!(notifications[0].result, ResultKind::RequestBusy);
    }

    #[test]
    fn test_failures_of_fire_and_forget_calls_are_skipped() {
        let mut f = Fixture::new();
        let consumer = f.consumer();
        let disconnect = f.id("RequestDisconnect");
        let seq = f.proxy.send_request(disconnect, Payload::new(), Some(consumer)).unwrap();
        f.drain();

        f.respond(ResultKind::RequestError, disconnect, seq, Payload::new());
        f.respond(ResultKind::MessageUndelivered, disconnect, seq, Payload::new());
        assert!(f.drain().is_empty());
    }

    #[test]
    fn test_attribute_validity_gating() {
        let mut f = Fixture::new();
        let consumer = f.consumer();
        let participants = f.id("Participants");
        assert_eq!(f.proxy.data_state(participants), DataState::Unavailable);
        assert_eq!(f.proxy.attribute::<Vec<String>>(participants), None);

        f.proxy.set_notification(participants, consumer, false).unwrap();
        f.respond(ResultKind::DataOk, participants, 0, Payload::of(&["alice"]).unwrap());
        assert_eq!(f.proxy.attribute::<Vec<String>>(participants), Some(vec!["alice".to_string()]));

        f.respond(ResultKind::DataInvalid, participants, 0, Payload::new());
        assert_eq!(f.proxy.data_state(participants), DataState::Invalid);
        assert_eq!(f.proxy.attribute::<Vec<String>>(participants), None);

        f.respond(ResultKind::DataOk, participants, 0, Payload::of(&["bob"]).unwrap());
        assert_eq!(f.proxy.attribute::<Vec<String>>(participants), Some(vec!["bob".to_string()]));
    }

    #[test]
    fn test_first_subscriber_starts_last_stops() {
        let mut f = Fixture::new();
        let first = f.consumer();
        let second = f.consumer();
        let broadcast = f.id("BroadcastMessage");

        f.proxy.set_notification(broadcast, first, false).unwrap();
        f.proxy.set_notification(broadcast, second, false).unwrap();
        let starts: Vec<_> = f
            .drain()
            .into_iter()
            .filter(|e| matches!(e, ServiceEvent::NotifyRequest(n) if n.request == NotifyRequestType::StartNotify))
            .collect();
        assert_eq!(starts.len(), 1);
        assert_eq!(f.proxy.subscriber_count(broadcast), 2);

        f.proxy.clear_notification(broadcast, first);
        assert!(f.drain().is_empty());
        f.proxy.clear_all_notifications(second);
        match &f.drain()[..] {
            [ServiceEvent::NotifyRequest(n)] => assert_eq!(n.request, NotifyRequestType::StopNotify),
            other => panic!("Unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_notify_always_redelivers_cached_value() {
        let mut f = Fixture::new();
        let consumer = f.consumer();
        let late = f.consumer();
        let participants = f.id("Participants");
        f.proxy.set_notification(participants, consumer, false).unwrap();
        f.respond(ResultKind::DataOk, participants, 0, Payload::of(&1).unwrap());
        f.drain();

        f.proxy.set_notification(participants, consumer, false).unwrap();
        assert!(f.drain().is_empty());

        f.proxy.set_notification(participants, consumer, true).unwrap();
        let notifications = f.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].result, ResultKind::DataOk);

        // a second consumer is served from the cache
        f.proxy.set_notification(participants, late, false).unwrap();
        let events = f.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ServiceEvent::Notification(n) if n.consumer == late));
    }

    #[test]
    fn test_notification_reaches_consumer_callback() {
        let mut f = Fixture::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let consumer = f.proxy.attach_consumer(Arc::new(Mutex::new(
            move |proxy: &mut Proxy, event: &NotificationEvent| {
                let value = proxy.attribute::<i32>(event.msg_id);
                record.lock().unwrap().push((event.result, value));
            },
        )));
        let participants = f.id("Participants");
        f.proxy.set_notification(participants, consumer, false).unwrap();
        f.respond(ResultKind::DataOk, participants, 0, Payload::of(&3).unwrap());

        for notification in f.notifications() {
            f.proxy.process_event(ServiceEvent::Notification(notification));
        }
        assert_eq!(*seen.lock().unwrap(), vec![(ResultKind::DataOk, Some(3))]);
    }

    #[test]
    fn test_detached_consumer_is_not_called() {
        let mut f = Fixture::new();
        let consumer = f.consumer();
        let participants = f.id("Participants");
        f.proxy.set_notification(participants, consumer, false).unwrap();
        f.proxy.detach_consumer(consumer);
        assert!(!f.proxy.is_subscribed(participants, consumer));
        assert!(matches!(
            f.proxy.set_notification(participants, consumer, false),
            Err(BusError::UnknownConsumer(_))
        ));
    }

    #[test]
    fn test_shutdown_removes_all_subscriptions() {
        let mut f = Fixture::new();
        let consumer = f.consumer();
        f.proxy.set_notification(f.id("Participants"), consumer, false).unwrap();
        f.drain();

        f.proxy.shutdown();
        match &f.drain()[..] {
            [ServiceEvent::NotifyRequest(n)] => {
                assert_eq!(n.request, NotifyRequestType::RemoveAllNotify);
                assert_eq!(n.msg_id, MessageId::NO_PROCEED);
            }
            other => panic!("Unexpected events: {:?}", other),
        }
        assert!(!f.proxy.is_active());
    }

    #[test]
    fn test_request_with_non_request_id_rejected() {
        let mut f = Fixture::new();
        let result = f.proxy.send_request(f.id("Participants"), Payload::new(), None);
        assert!(matches!(result, Err(BusError::UnexpectedMessage { .. })));
        assert_eq!(f.proxy.last_sequence(), 0);
    }
}
