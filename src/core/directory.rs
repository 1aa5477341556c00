//! Process-wide routing of service events to dispatcher threads.
//!
//! The directory knows which dispatcher hosts each local stub and proxy. Events
//! for endpoints it does not host go to the router link when one is attached;
//! requests that cannot be routed at all are answered with
//! `MESSAGE_UNDELIVERED` so the caller is never left waiting.

use super::dispatcher::DispatcherHandle;
use crate::error::{BusError, BusResult};
use crate::event::{NotifyRequestType, RemoteEvent, ResponseEvent, ResultKind, ServiceEvent};
use crate::service::{ChannelId, Payload, ProxyAddress, ServiceKind, StubAddress};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;

/// Anything service events can be posted to.
pub trait EventSink: Send + Sync {
    fn post_event(&self, event: ServiceEvent);
}

impl EventSink for mpsc::UnboundedSender<ServiceEvent> {
    fn post_event(&self, event: ServiceEvent) {
        if self.send(event).is_err() {
            log::debug!("Event sink closed, event dropped");
        }
    }
}

/// Connection to the router process.
pub trait RemoteOutlet: Send + Sync {
    /// Sends an event to the router; false when the link is down.
    fn forward(&self, event: RemoteEvent) -> bool;
    fn announce_stub(&self, address: &StubAddress);
    fn withdraw_stub(&self, address: &StubAddress);
}

struct LocalStub {
    thread: String,
    kind: ServiceKind,
}

#[derive(Default)]
struct DirectoryState {
    dispatchers: HashMap<String, DispatcherHandle>,
    stubs: HashMap<StubAddress, LocalStub>,
    proxies: HashSet<ProxyAddress>,
    remote: Option<Arc<dyn RemoteOutlet>>,
}

enum Route {
    Local(DispatcherHandle),
    Remote(Arc<dyn RemoteOutlet>),
    Unroutable,
}

pub struct ServiceDirectory {
    channel: ChannelId,
    state: RwLock<DirectoryState>,
}

impl ServiceDirectory {
    /// New directory on a random channel.
    pub fn new() -> Arc<Self> {
        Self::with_channel(rand::random())
    }

    pub fn with_channel(channel: ChannelId) -> Arc<Self> {
        Arc::new(Self {
            channel,
            state: RwLock::new(DirectoryState::default()),
        })
    }

    /// Channel stamped on every proxy started here; tells apart proxies of
    /// different processes that share thread names.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn attach_dispatcher(&self, dispatcher: &DispatcherHandle) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state
            .dispatchers
            .insert(dispatcher.name().to_string(), dispatcher.clone());
    }

    pub fn detach_dispatcher(&self, name: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.dispatchers.remove(name);
    }

    pub fn register_stub(&self, address: &StubAddress, thread: &str, kind: ServiceKind) -> BusResult<()> {
        let outlet = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.stubs.contains_key(address) {
                return Err(BusError::AlreadyRegistered(address.to_string()));
            }
            state.stubs.insert(
                address.clone(),
                LocalStub {
                    thread: thread.to_string(),
                    kind,
                },
            );
            state.remote.clone().filter(|_| kind == ServiceKind::Remote)
        };
        if let Some(outlet) = outlet {
            outlet.announce_stub(address);
        }
        log::debug!("Stub {} hosted on {}", address, thread);
        Ok(())
    }

    pub fn unregister_stub(&self, address: &StubAddress) {
        let outlet = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            match state.stubs.remove(address) {
                Some(stub) if stub.kind == ServiceKind::Remote => state.remote.clone(),
                _ => None,
            }
        };
        if let Some(outlet) = outlet {
            outlet.withdraw_stub(address);
        }
    }

    pub fn register_proxy(&self, address: &ProxyAddress) -> BusResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.proxies.insert(address.clone()) {
            return Err(BusError::AlreadyRegistered(address.to_string()));
        }
        Ok(())
    }

    pub fn unregister_proxy(&self, address: &ProxyAddress) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.proxies.remove(address);
    }

    pub fn is_local_stub(&self, address: &StubAddress) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.stubs.contains_key(address)
    }

    /// Attaches the router link and announces every remote-kind stub already hosted.
    pub fn set_remote(&self, outlet: Arc<dyn RemoteOutlet>) {
        let announced: Vec<StubAddress> = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.remote = Some(outlet.clone());
            state
                .stubs
                .iter()
                .filter(|(_, stub)| stub.kind == ServiceKind::Remote)
                .map(|(address, _)| address.clone())
                .collect()
        };
        for address in &announced {
            outlet.announce_stub(address);
        }
    }

    pub fn clear_remote(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.remote = None;
    }

    pub fn has_remote(&self) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.remote.is_some()
    }

    /// Entry point for events arriving from the router: delivered locally only.
    pub fn deliver_remote(&self, event: RemoteEvent) {
        self.route(ServiceEvent::from(event), false);
    }

    fn resolve(&self, event: &ServiceEvent, allow_remote: bool) -> Route {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let thread = match event {
            ServiceEvent::Request(e) => state.stubs.get(&e.target).map(|s| s.thread.as_str()),
            ServiceEvent::NotifyRequest(e) => state.stubs.get(&e.target).map(|s| s.thread.as_str()),
            ServiceEvent::Response(e) => state
                .proxies
                .contains(&e.target)
                .then_some(e.target.thread.as_str()),
            ServiceEvent::Notification(e) => Some(e.proxy.thread.as_str()),
        };

        if let Some(dispatcher) = thread.and_then(|thread| state.dispatchers.get(thread)) {
            return Route::Local(dispatcher.clone());
        }
        match &state.remote {
            Some(outlet) if allow_remote => Route::Remote(outlet.clone()),
            _ => Route::Unroutable,
        }
    }

    fn route(&self, event: ServiceEvent, allow_remote: bool) {
        match self.resolve(&event, allow_remote) {
            Route::Local(dispatcher) => {
                let fallback = event.clone();
                if let Err(e) = dispatcher.post_event(event) {
                    log::warn!("{}", e);
                    self.reject_undelivered(fallback);
                }
            }
            Route::Remote(outlet) => match RemoteEvent::try_from(event) {
                Ok(remote) => {
                    let fallback = ServiceEvent::from(remote.clone());
                    if !outlet.forward(remote) {
                        log::warn!("Router link down, event to {} not sent", fallback.target());
                        self.reject_undelivered(fallback);
                    }
                }
                Err(notification) => {
                    log::warn!("Notification for unknown dispatcher {}", notification.proxy.thread);
                }
            },
            Route::Unroutable => self.reject_undelivered(event),
        }
    }

    fn reject_undelivered(&self, event: ServiceEvent) {
        let (source, target, msg_id, seq) = match event {
            ServiceEvent::Request(e) => (e.target, e.source, e.msg_id, e.seq),
            ServiceEvent::NotifyRequest(e) if e.request == NotifyRequestType::StartNotify => {
                (e.target, e.source, e.msg_id, e.seq)
            }
            other => {
                log::warn!("Dropping undeliverable {:?} event to {}", other.kind(), other.target());
                return;
            }
        };
        log::warn!("No route to stub {}, message {} undelivered", source, msg_id);
        let response = ResponseEvent::new(
            source,
            target,
            ResultKind::MessageUndelivered,
            msg_id,
            seq,
            Payload::new(),
        );
        // the caller may live in another process
        self.route(ServiceEvent::Response(response), true);
    }
}

impl EventSink for ServiceDirectory {
    fn post_event(&self, event: ServiceEvent) {
        self.route(event, true);
    }
}
