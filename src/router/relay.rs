//! Routing table of the router process.
//!
//! Stubs are placed by the `RegisterStub` frames of their session; proxies
//! are learned from the requests they send. The table only decides where an
//! event goes; sending is up to the transport.
//!
//! Calls and subscriptions passing through are remembered per stub until
//! answered or cancelled, so callers hear about it when a stub's session
//! disappears.

use crate::event::{
    NotifyRequestEvent, NotifyRequestType, RemoteEvent, ResponseEvent, ResultKind, SequenceNr,
    NO_SEQUENCE,
};
use crate::service::{MessageId, Payload, ProxyAddress, StubAddress};
use crate::transport::SessionId;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Event to be sent on a session.
pub type Delivery = (SessionId, RemoteEvent);

#[derive(Debug, Default)]
pub struct RelayTable {
    stubs: HashMap<StubAddress, SessionId>,
    proxies: HashMap<ProxyAddress, SessionId>,
    /// Stubs each session's proxies have talked to.
    contacts: HashMap<SessionId, BTreeSet<(ProxyAddress, StubAddress)>>,
    /// Relayed calls still waiting for an answer, by caller and sequence.
    pending: HashMap<StubAddress, BTreeMap<(ProxyAddress, SequenceNr), MessageId>>,
    /// Relayed subscriptions.
    subscriptions: HashMap<StubAddress, BTreeSet<(ProxyAddress, MessageId)>>,
}

impl RelayTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places `address` on `session`; refused while another session hosts it.
    pub fn register_stub(&mut self, session: SessionId, address: StubAddress) -> bool {
        match self.stubs.get(&address) {
            Some(owner) if *owner != session => {
                log::warn!("Stub {} already hosted by session {}, refused for {}", address, owner, session);
                false
            }
            _ => {
                log::info!("Stub {} registered by session {}", address, session);
                self.stubs.insert(address, session);
                true
            }
        }
    }

    /// Withdraws a stub. Its process cancels the outstanding calls itself.
    pub fn unregister_stub(&mut self, session: SessionId, address: &StubAddress) {
        if self.stubs.get(address) == Some(&session) {
            self.stubs.remove(address);
            self.pending.remove(address);
            self.subscriptions.remove(address);
            log::info!("Stub {} unregistered by session {}", address, session);
        }
    }

    pub fn stub_session(&self, address: &StubAddress) -> Option<SessionId> {
        self.stubs.get(address).copied()
    }

    pub fn proxy_session(&self, address: &ProxyAddress) -> Option<SessionId> {
        self.proxies.get(address).copied()
    }

    pub fn stub_count(&self) -> usize {
        self.stubs.len()
    }

    /// Number of relayed calls `stub` has not answered yet.
    pub fn pending_calls(&self, stub: &StubAddress) -> usize {
        self.pending.get(stub).map_or(0, BTreeMap::len)
    }

    /// Decides where an event received on `from` goes.
    pub fn route(&mut self, from: SessionId, event: RemoteEvent) -> Vec<Delivery> {
        match event {
            RemoteEvent::Request(request) => {
                self.learn(from, &request.source, &request.target);
                match self.stub_session(&request.target) {
                    Some(session) => {
                        if request.expects_response {
                            self.pending
                                .entry(request.target.clone())
                                .or_default()
                                .insert((request.source.clone(), request.seq), request.msg_id);
                        }
                        vec![(session, RemoteEvent::Request(request))]
                    }
                    None => {
                        log::warn!("Request {} for unknown stub {}", request.msg_id, request.target);
                        vec![(from, undelivered(request.target, request.source, request.msg_id, request.seq))]
                    }
                }
            }
            RemoteEvent::NotifyRequest(notify) => {
                self.learn(from, &notify.source, &notify.target);
                self.track_subscription(&notify);
                if notify.request == NotifyRequestType::RemoveAllNotify {
                    if let Some(contacts) = self.contacts.get_mut(&from) {
                        contacts.remove(&(notify.source.clone(), notify.target.clone()));
                    }
                }
                match self.stub_session(&notify.target) {
                    Some(session) => vec![(session, RemoteEvent::NotifyRequest(notify))],
                    None if notify.request == NotifyRequestType::StartNotify => {
                        log::warn!("Subscription to {} of unknown stub {}", notify.msg_id, notify.target);
                        vec![(from, undelivered(notify.target, notify.source, notify.msg_id, notify.seq))]
                    }
                    None => Vec::new(),
                }
            }
            RemoteEvent::Response(response) => {
                if let Some(calls) = self.pending.get_mut(&response.source) {
                    calls.remove(&(response.target.clone(), response.seq));
                }
                match self.proxy_session(&response.target) {
                    Some(session) => vec![(session, RemoteEvent::Response(response))],
                    None => {
                        log::warn!("Response {} for unknown proxy {}", response.msg_id, response.target);
                        Vec::new()
                    }
                }
            }
        }
    }

    /// Forgets a closed session.
    ///
    /// Callers waiting on its stubs get `MESSAGE_UNDELIVERED` and their
    /// subscribers `DATA_INVALID`. Stubs its proxies contacted get one
    /// `REMOVE_ALL_NOTIFY` per proxy.
    pub fn close_session(&mut self, session: SessionId) -> Vec<Delivery> {
        let hosted: Vec<StubAddress> = self
            .stubs
            .iter()
            .filter(|(_, owner)| **owner == session)
            .map(|(address, _)| address.clone())
            .collect();
        let departed: HashSet<ProxyAddress> = self
            .proxies
            .iter()
            .filter(|(_, owner)| **owner == session)
            .map(|(address, _)| address.clone())
            .collect();
        self.proxies.retain(|_, owner| *owner != session);

        let mut deliveries = Vec::new();
        for stub in hosted {
            self.stubs.remove(&stub);
            log::info!("Stub {} gone with session {}", stub, session);
            deliveries.extend(self.orphan(stub));
        }

        for calls in self.pending.values_mut() {
            calls.retain(|(proxy, _), _| !departed.contains(proxy));
        }
        for subscriptions in self.subscriptions.values_mut() {
            subscriptions.retain(|(proxy, _)| !departed.contains(proxy));
        }

        let contacts = self.contacts.remove(&session).unwrap_or_default();
        deliveries.extend(contacts.into_iter().filter_map(|(proxy, stub)| {
            let target = self.stub_session(&stub)?;
            Some((
                target,
                RemoteEvent::NotifyRequest(NotifyRequestEvent::remove_all(proxy, stub)),
            ))
        }));
        deliveries
    }

    /// Rejects everything proxies still expect from a vanished stub.
    fn orphan(&mut self, stub: StubAddress) -> Vec<Delivery> {
        let calls = self.pending.remove(&stub).unwrap_or_default();
        let subscriptions = self.subscriptions.remove(&stub).unwrap_or_default();

        let mut deliveries = Vec::new();
        for ((proxy, seq), msg_id) in calls {
            let Some(session) = self.proxy_session(&proxy) else {
                continue;
            };
            log::warn!("Call {} of {} lost with stub {}", msg_id, proxy, stub);
            deliveries.push((session, undelivered(stub.clone(), proxy, msg_id, seq)));
        }
        for (proxy, msg_id) in subscriptions {
            let Some(session) = self.proxy_session(&proxy) else {
                continue;
            };
            deliveries.push((
                session,
                RemoteEvent::Response(ResponseEvent::new(
                    stub.clone(),
                    proxy,
                    ResultKind::DataInvalid,
                    msg_id,
                    NO_SEQUENCE,
                    Payload::new(),
                )),
            ));
        }
        deliveries
    }

    fn track_subscription(&mut self, notify: &NotifyRequestEvent) {
        match notify.request {
            NotifyRequestType::StartNotify => {
                if self.stubs.contains_key(&notify.target) {
                    self.subscriptions
                        .entry(notify.target.clone())
                        .or_default()
                        .insert((notify.source.clone(), notify.msg_id));
                }
            }
            NotifyRequestType::StopNotify => {
                if let Some(subscriptions) = self.subscriptions.get_mut(&notify.target) {
                    subscriptions.remove(&(notify.source.clone(), notify.msg_id));
                }
            }
            NotifyRequestType::RemoveAllNotify => {
                if let Some(subscriptions) = self.subscriptions.get_mut(&notify.target) {
                    subscriptions.retain(|(proxy, _)| proxy != &notify.source);
                }
            }
        }
    }

    fn learn(&mut self, session: SessionId, proxy: &ProxyAddress, stub: &StubAddress) {
        self.proxies.insert(proxy.clone(), session);
        self.contacts
            .entry(session)
            .or_default()
            .insert((proxy.clone(), stub.clone()));
    }
}

fn undelivered(
    stub: StubAddress,
    proxy: ProxyAddress,
    msg_id: MessageId,
    seq: SequenceNr,
) -> RemoteEvent {
    RemoteEvent::Response(ResponseEvent::new(
        stub,
        proxy,
        ResultKind::MessageUndelivered,
        msg_id,
        seq,
        Payload::new(),
    ))
}
