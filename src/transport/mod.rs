//! Connection layer between processes and the router.
//!
//! The router drives a [`Transport`] through its lifecycle; [`TcpTransport`]
//! accepts process connections and relays their events. Processes attach to
//! the router with a [`RouterLink`].

pub mod framing;
pub mod link;
pub mod tcp;

pub use link::RouterLink;
pub use tcp::TcpTransport;

use crate::config::{ConfigError, RouterConfig};
use crate::event::RemoteEvent;
use crate::service::StubAddress;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Router-assigned identifier of one process connection.
pub type SessionId = u64;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport is not configured")]
    NotConfigured,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport did not become ready within {0:?}")]
    StartTimeout(Duration),

    #[error("Transport thread exited before reporting ready")]
    StartAborted,

    #[error("Handshake with router failed: {0}")]
    Handshake(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Unit exchanged between a process and the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouterFrame {
    /// First frame on every connection, router to process.
    Welcome { session: SessionId },
    RegisterStub { address: StubAddress },
    UnregisterStub { address: StubAddress },
    Event { event: RemoteEvent },
}

/// Remoting service driven by the router lifecycle.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send {
    fn configure(&mut self, config: &RouterConfig) -> Result<(), TransportError>;

    /// Begins accepting and relaying; blocks until ready or failed.
    fn start_remoting_service(&mut self) -> Result<(), TransportError>;

    /// Stops accepting connections and holds relayed traffic; sessions stay open.
    fn pause_remoting_service(&mut self);

    /// Accepts again and relays what was held, in arrival order.
    fn resume_remoting_service(&mut self) -> Result<(), TransportError>;

    fn stop_remoting_service(&mut self);

    fn is_configured(&self) -> bool;
}
