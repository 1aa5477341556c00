//! Server side of a service.
//!
//! [`StubBase`] is the generic state machine: listener records, outstanding
//! calls and attribute values. A [`ServiceHandler`] supplies the interface
//! logic, and [`Stub`] glues the two together as a dispatcher consumer.

pub mod base;
pub mod server;

pub use base::{StubBase, StubListener};
pub use server::{ServiceHandler, Stub, StubHandle, StubView};
