//! Endpoint addresses of stubs and proxies.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of a server stub: one implementation of a service under a role name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StubAddress {
    pub service: String,
    pub role: String,
}

impl StubAddress {
    pub fn new(service: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            role: role.into(),
        }
    }
}

impl fmt::Display for StubAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.service, self.role)
    }
}

/// Identifies the service directory (and so the process) a proxy lives in.
pub type ChannelId = u64;

/// Address of a client proxy. `thread` is the name of the dispatcher that
/// owns it, `channel` the directory it was started in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProxyAddress {
    pub service: String,
    pub role: String,
    pub thread: String,
    #[serde(default)]
    pub channel: ChannelId,
}

impl ProxyAddress {
    /// Address on channel 0; see [`on_channel`](Self::on_channel).
    pub fn new(service: impl Into<String>, role: impl Into<String>, thread: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            role: role.into(),
            thread: thread.into(),
            channel: 0,
        }
    }

    pub fn on_channel(mut self, channel: ChannelId) -> Self {
        self.channel = channel;
        self
    }

    /// Stub this proxy talks to.
    pub fn stub(&self) -> StubAddress {
        StubAddress::new(self.service.clone(), self.role.clone())
    }
}

impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}@{}#{:x}", self.service, self.role, self.thread, self.channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_equality_requires_all_fields() {
        let a = ProxyAddress::new("Chat", "main", "ui");
        assert_eq!(a, ProxyAddress::new("Chat", "main", "ui"));
        assert_ne!(a, ProxyAddress::new("Chat", "main", "worker"));
        assert_ne!(a, ProxyAddress::new("Chat", "backup", "ui"));
        // same thread name in another process
        assert_ne!(a, ProxyAddress::new("Chat", "main", "ui").on_channel(7));
        assert_eq!(a.stub(), StubAddress::new("Chat", "main"));
    }

    #[test]
    fn test_display() {
        assert_eq!(StubAddress::new("Chat", "main").to_string(), "Chat::main");
        assert_eq!(ProxyAddress::new("Chat", "main", "ui").to_string(), "Chat::main@ui#0");
        assert_eq!(
            ProxyAddress::new("Chat", "main", "ui").on_channel(0xbeef).to_string(),
            "Chat::main@ui#beef"
        );
    }
}
