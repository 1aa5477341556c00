use super::client::Proxy;
use crate::event::{ConsumerId, NotificationEvent, SequenceNr};
use crate::service::MessageId;
use std::sync::{Arc, Mutex};

/// Receiver of proxy notifications, called on the proxy's dispatcher thread.
pub trait NotificationConsumer: Send + 'static {
    fn on_notification(&mut self, proxy: &mut Proxy, event: &NotificationEvent);
}

impl<F> NotificationConsumer for F
where
    F: FnMut(&mut Proxy, &NotificationEvent) + Send + 'static,
{
    fn on_notification(&mut self, proxy: &mut Proxy, event: &NotificationEvent) {
        self(proxy, event)
    }
}

pub type SharedNotificationConsumer = Arc<Mutex<dyn NotificationConsumer>>;

/// One consumer subscribed to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub consumer: ConsumerId,
    pub notify_always: bool,
}

/// A consumer waiting for the response to one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingCall {
    pub response_id: MessageId,
    pub seq: SequenceNr,
    pub consumer: ConsumerId,
}
