#![allow(dead_code)]

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use svcbus::{
    BusError, BusResult, ConsumerId, MessageId, NotificationEvent, Payload, PayloadReader, Proxy,
    ProxyHandle, ServiceDescriptor, ServiceHandler, ServiceKind, StubBase, Version,
};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_logger() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

pub fn chat_descriptor() -> Arc<ServiceDescriptor> {
    ServiceDescriptor::builder("Chat", Version::new(1, 0, 0), ServiceKind::Remote)
        .response("ResponseConnect", 3)
        .response("ResponseHistory", 1)
        .broadcast("BroadcastMessage", 2)
        .request("RequestConnect", Some("ResponseConnect"))
        .request("RequestHistory", Some("ResponseHistory"))
        .request("RequestSend", None)
        .request("RequestDisconnect", None)
        .attribute("Participants")
        .build()
        .expect("chat descriptor")
}

/// Chat room logic: connect hands out cookies from 7, history is answered later.
pub struct ChatHandler {
    next_cookie: u32,
    members: Vec<(u32, String)>,
}

impl Default for ChatHandler {
    fn default() -> Self {
        Self {
            next_cookie: 7,
            members: Vec::new(),
        }
    }
}

impl ChatHandler {
    fn publish(&self, stub: &mut StubBase) -> BusResult<()> {
        let names: Vec<&str> = self.members.iter().map(|(_, name)| name.as_str()).collect();
        let participants = stub.descriptor().require("Participants")?;
        stub.set_attribute(participants, &names)
    }

    fn member(&self, cookie: u32) -> BusResult<&str> {
        self.members
            .iter()
            .find(|(c, _)| *c == cookie)
            .map(|(_, name)| name.as_str())
            .ok_or_else(|| BusError::UnknownName(format!("cookie {}", cookie)))
    }
}

impl ServiceHandler for ChatHandler {
    fn process_request(
        &mut self,
        stub: &mut StubBase,
        request: MessageId,
        params: &mut PayloadReader<'_>,
    ) -> BusResult<()> {
        let descriptor = stub.descriptor().clone();
        match descriptor.name_of(request) {
            Some("RequestConnect") => {
                let nick: String = params.read()?;
                let cookie = self.next_cookie;
                self.next_cookie += 1;
                self.members.push((cookie, nick.clone()));

                let mut payload = Payload::new();
                payload.write(&nick)?.write(&cookie)?.write("Accepted")?;
                stub.send_response(descriptor.require("ResponseConnect")?, payload);
                self.publish(stub)
            }
            Some("RequestSend") => {
                let cookie: u32 = params.read()?;
                let text: String = params.read()?;
                let nick = self.member(cookie)?.to_string();
                let mut payload = Payload::new();
                payload.write(&nick)?.write(&text)?;
                stub.send_broadcast(descriptor.require("BroadcastMessage")?, payload);
                Ok(())
            }
            Some("RequestDisconnect") => {
                let cookie: u32 = params.read()?;
                self.member(cookie)?;
                self.members.retain(|(c, _)| *c != cookie);
                self.publish(stub)
            }
            // answered later through the stub handle
            Some("RequestHistory") => Ok(()),
            _ => Err(BusError::UnknownName(request.to_string())),
        }
    }

    fn startup(&mut self, stub: &mut StubBase) -> BusResult<()> {
        self.publish(stub)
    }
}

/// What a consumer saw: the notification plus the proxy's data at that moment.
#[derive(Debug, Clone)]
pub struct Observed {
    pub event: NotificationEvent,
    pub values: Option<Vec<serde_json::Value>>,
}

/// Attaches a consumer on the proxy's thread that reports every notification.
pub fn attach_observer(proxy: &ProxyHandle) -> (ConsumerId, mpsc::Receiver<Observed>) {
    let (tx, rx) = mpsc::channel();
    let (id_tx, id_rx) = mpsc::channel();
    proxy
        .execute(move |proxy| {
            let consumer = proxy.attach_consumer(Arc::new(Mutex::new(
                move |proxy: &mut Proxy, event: &NotificationEvent| {
                    let values = proxy.data(event.msg_id).map(|mut reader| {
                        std::iter::from_fn(|| reader.read::<serde_json::Value>().ok()).collect()
                    });
                    let _ = tx.send(Observed {
                        event: event.clone(),
                        values,
                    });
                },
            )));
            let _ = id_tx.send(consumer);
        })
        .expect("proxy dispatcher running");
    (id_rx.recv_timeout(WAIT).expect("consumer attached"), rx)
}

/// Sends a request from the proxy's own thread and returns its sequence number.
pub fn call(proxy: &ProxyHandle, request: &str, payload: Payload, consumer: Option<ConsumerId>) -> u64 {
    let (tx, rx) = mpsc::channel();
    let request = request.to_string();
    proxy
        .execute(move |proxy| {
            let id = proxy.descriptor().id_of(&request);
            let _ = tx.send(proxy.send_request(id, payload, consumer));
        })
        .expect("proxy dispatcher running");
    rx.recv_timeout(WAIT)
        .expect("request issued")
        .expect("request accepted")
}

pub fn subscribe(proxy: &ProxyHandle, name: &str, consumer: ConsumerId, notify_always: bool) {
    let (tx, rx) = mpsc::channel();
    let name = name.to_string();
    proxy
        .execute(move |proxy| {
            let id = proxy.descriptor().id_of(&name);
            let _ = tx.send(proxy.set_notification(id, consumer, notify_always));
        })
        .expect("proxy dispatcher running");
    rx.recv_timeout(WAIT)
        .expect("subscription issued")
        .expect("subscription accepted");
}

/// Polls `condition` until it holds or the wait expires.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
