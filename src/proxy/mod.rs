//! Client side of a service: one proxy per service role and owning thread.

pub mod client;
pub mod consumer;

pub use client::{Proxy, ProxyHandle, ProxyView};
pub use consumer::{NotificationConsumer, SharedNotificationConsumer, Subscription};
pub use crate::event::ConsumerId;
