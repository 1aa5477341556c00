pub mod config;
pub mod core;
pub mod error;
pub mod event;
pub mod proxy;
pub mod router;
pub mod service;
pub mod stub;
pub mod transport;

// 公開API
pub use config::{ConfigError, RouterConfig};
pub use error::{BusError, BusResult};
pub use event::*;
pub use service::*;

pub use crate::core::{Dispatcher, DispatcherHandle, EventSink, ServiceDirectory};
pub use proxy::{NotificationConsumer, Proxy, ProxyHandle, ProxyView};
pub use router::{ConsoleControl, RouterError, RouterService, RouterState, ServiceControl};
pub use stub::{ServiceHandler, Stub, StubBase, StubHandle, StubView};
pub use transport::{RouterLink, TcpTransport, Transport, TransportError};
