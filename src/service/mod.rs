//! Service interface metadata, endpoint addresses and payload streams.

pub mod address;
pub mod descriptor;
pub mod payload;

pub use address::{ChannelId, ProxyAddress, StubAddress};
pub use descriptor::{
    DescriptorBuilder, MessageCategory, MessageId, ServiceDescriptor, ServiceKind, Version,
};
pub use payload::{Payload, PayloadReader};
