//! Static per-interface metadata shared by every stub and proxy of a service.

use crate::error::{BusError, BusResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

const REQUEST_BASE: u32 = 0x1000;
const RESPONSE_BASE: u32 = 0x2000;
const ATTRIBUTE_BASE: u32 = 0x3000;
const RANGE_SIZE: u32 = 0x1000;

/// Identifier of a message inside one service interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u32);

impl MessageId {
    /// The request produces no response.
    pub const NO_PROCEED: MessageId = MessageId(0);
    /// Not a recognised ID of any interface.
    pub const INVALID: MessageId = MessageId(u32::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::NO_PROCEED && self != Self::INVALID
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NO_PROCEED => write!(f, "NO_PROCEED"),
            Self::INVALID => write!(f, "INVALID"),
            MessageId(raw) => write!(f, "0x{:04X}", raw),
        }
    }
}

/// Category an ID belongs to for the lifetime of its interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCategory {
    Request,
    Response,
    Broadcast,
    Attribute,
}

impl MessageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageCategory::Request => "request",
            MessageCategory::Response => "response",
            MessageCategory::Broadcast => "broadcast",
            MessageCategory::Attribute => "attribute",
        }
    }
}

/// Whether the interface is reachable only inside the process or also through the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone)]
struct RequestEntry {
    name: String,
    response: MessageId,
}

#[derive(Debug, Clone)]
struct ResponseEntry {
    name: String,
    arity: usize,
    broadcast: bool,
}

/// Immutable description of one service interface.
///
/// Created once (usually behind a `static` or at process start) and shared as
/// `Arc<ServiceDescriptor>` by every stub and proxy of the interface.
#[derive(Debug)]
pub struct ServiceDescriptor {
    name: String,
    version: Version,
    kind: ServiceKind,
    requests: Vec<RequestEntry>,
    responses: Vec<ResponseEntry>,
    attributes: Vec<String>,
    names: HashMap<String, MessageId>,
}

impl ServiceDescriptor {
    pub fn builder(name: impl Into<String>, version: Version, kind: ServiceKind) -> DescriptorBuilder {
        DescriptorBuilder {
            name: name.into(),
            version,
            kind,
            requests: Vec::new(),
            responses: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn response_count(&self) -> usize {
        self.responses.iter().filter(|r| !r.broadcast).count()
    }

    pub fn broadcast_count(&self) -> usize {
        self.responses.iter().filter(|r| r.broadcast).count()
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Looks up an ID by its declared name; `INVALID` when unknown.
    pub fn id_of(&self, name: &str) -> MessageId {
        self.names.get(name).copied().unwrap_or(MessageId::INVALID)
    }

    /// Like [`id_of`](Self::id_of) but fails for unknown names.
    pub fn require(&self, name: &str) -> BusResult<MessageId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| BusError::UnknownName(name.to_string()))
    }

    pub fn name_of(&self, id: MessageId) -> Option<&str> {
        let (category, index) = self.locate(id)?;
        Some(match category {
            MessageCategory::Request => self.requests[index].name.as_str(),
            MessageCategory::Response | MessageCategory::Broadcast => {
                self.responses[index].name.as_str()
            }
            MessageCategory::Attribute => self.attributes[index].as_str(),
        })
    }

    /// Category of `id`, or `None` when the ID does not belong to this interface.
    pub fn category(&self, id: MessageId) -> Option<MessageCategory> {
        self.locate(id).map(|(category, _)| category)
    }

    pub fn is_category(&self, id: MessageId, category: MessageCategory) -> bool {
        self.category(id) == Some(category)
    }

    /// Response ID a request answers with. `NO_PROCEED` for fire-and-forget
    /// requests, `INVALID` when `request` is not a request of this interface.
    pub fn response_of(&self, request: MessageId) -> MessageId {
        match self.locate(request) {
            Some((MessageCategory::Request, index)) => self.requests[index].response,
            _ => MessageId::INVALID,
        }
    }

    /// Number of encoded parameters a response, broadcast or attribute carries.
    pub fn arity(&self, id: MessageId) -> Option<usize> {
        match self.locate(id)? {
            (MessageCategory::Response | MessageCategory::Broadcast, index) => {
                Some(self.responses[index].arity)
            }
            (MessageCategory::Attribute, _) => Some(1),
            (MessageCategory::Request, _) => None,
        }
    }

    pub fn attribute_ids(&self) -> impl Iterator<Item = MessageId> + '_ {
        (0..self.attributes.len()).map(|i| MessageId(ATTRIBUTE_BASE + i as u32))
    }

    pub fn request_ids(&self) -> impl Iterator<Item = MessageId> + '_ {
        (0..self.requests.len()).map(|i| MessageId(REQUEST_BASE + i as u32))
    }

    fn locate(&self, id: MessageId) -> Option<(MessageCategory, usize)> {
        let raw = id.0;
        if (REQUEST_BASE..REQUEST_BASE + RANGE_SIZE).contains(&raw) {
            let index = (raw - REQUEST_BASE) as usize;
            (index < self.requests.len()).then_some((MessageCategory::Request, index))
        } else if (RESPONSE_BASE..RESPONSE_BASE + RANGE_SIZE).contains(&raw) {
            let index = (raw - RESPONSE_BASE) as usize;
            self.responses.get(index).map(|entry| {
                let category = if entry.broadcast {
                    MessageCategory::Broadcast
                } else {
                    MessageCategory::Response
                };
                (category, index)
            })
        } else if (ATTRIBUTE_BASE..ATTRIBUTE_BASE + RANGE_SIZE).contains(&raw) {
            let index = (raw - ATTRIBUTE_BASE) as usize;
            (index < self.attributes.len()).then_some((MessageCategory::Attribute, index))
        } else {
            None
        }
    }
}

/// Builder assigning IDs in declaration order.
pub struct DescriptorBuilder {
    name: String,
    version: Version,
    kind: ServiceKind,
    requests: Vec<(String, Option<String>)>,
    responses: Vec<ResponseEntry>,
    attributes: Vec<String>,
}

impl DescriptorBuilder {
    /// Declares a request; `response` names the response it is answered with.
    pub fn request(mut self, name: impl Into<String>, response: Option<&str>) -> Self {
        self.requests.push((name.into(), response.map(str::to_string)));
        self
    }

    pub fn response(mut self, name: impl Into<String>, arity: usize) -> Self {
        self.responses.push(ResponseEntry {
            name: name.into(),
            arity,
            broadcast: false,
        });
        self
    }

    pub fn broadcast(mut self, name: impl Into<String>, arity: usize) -> Self {
        self.responses.push(ResponseEntry {
            name: name.into(),
            arity,
            broadcast: true,
        });
        self
    }

    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        self.attributes.push(name.into());
        self
    }

    /// Assigns IDs and resolves request responses.
    ///
    /// Fails on a name declared twice, on a category outgrowing its ID range
    /// and on a request answered by an unknown response.
    pub fn build(self) -> BusResult<Arc<ServiceDescriptor>> {
        check_range("request", self.requests.len())?;
        check_range("response", self.responses.len())?;
        check_range("attribute", self.attributes.len())?;

        let mut names = HashMap::new();
        for (i, entry) in self.responses.iter().enumerate() {
            declare(&mut names, &entry.name, MessageId(RESPONSE_BASE + i as u32))?;
        }
        for (i, name) in self.attributes.iter().enumerate() {
            declare(&mut names, name, MessageId(ATTRIBUTE_BASE + i as u32))?;
        }

        let mut requests = Vec::with_capacity(self.requests.len());
        for (i, (name, response)) in self.requests.into_iter().enumerate() {
            let response = match response {
                None => MessageId::NO_PROCEED,
                Some(response_name) => names
                    .get(&response_name)
                    .copied()
                    .filter(|id| (RESPONSE_BASE..ATTRIBUTE_BASE).contains(&id.0))
                    .filter(|id| !self.responses[(id.0 - RESPONSE_BASE) as usize].broadcast)
                    .ok_or(BusError::UnknownName(response_name))?,
            };
            declare(&mut names, &name, MessageId(REQUEST_BASE + i as u32))?;
            requests.push(RequestEntry { name, response });
        }

        Ok(Arc::new(ServiceDescriptor {
            name: self.name,
            version: self.version,
            kind: self.kind,
            requests,
            responses: self.responses,
            attributes: self.attributes,
            names,
        }))
    }
}

fn declare(names: &mut HashMap<String, MessageId>, name: &str, id: MessageId) -> BusResult<()> {
    if names.insert(name.to_string(), id).is_some() {
        return Err(BusError::AlreadyRegistered(name.to_string()));
    }
    Ok(())
}

fn check_range(category: &'static str, count: usize) -> BusResult<()> {
    if count > RANGE_SIZE as usize {
        return Err(BusError::RangeExhausted {
            category,
            limit: RANGE_SIZE,
        });
    }
    Ok(())
}
