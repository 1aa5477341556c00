//! Core module for dispatcher-based event delivery
//!
//! Each dispatcher owns one OS thread and a FIFO queue of service events.
//! Stubs and proxies register on the dispatcher of the thread that owns them,
//! and the service directory routes posted events to the right dispatcher or
//! to the router link.

pub mod directory;
pub mod dispatcher;
pub mod registry;

// Re-exports for convenience
pub use directory::{EventSink, RemoteOutlet, ServiceDirectory};
pub use dispatcher::{Dispatcher, DispatcherHandle, EventConsumer, SharedConsumer};
pub use registry::{ListenerTable, Registration};
