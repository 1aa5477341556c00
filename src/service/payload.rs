//! Ordered value stream carried by request and response events.
//!
//! The messaging core treats a payload as opaque bytes; only the typed
//! `write`/`read` primitives know the encoding (one JSON value per line).

use crate::error::{BusError, BusResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::de::StrRead;
use serde_json::{StreamDeserializer, Value};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload {
    buffer: String,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload holding exactly one value.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> BusResult<Self> {
        let mut payload = Self::new();
        payload.write(value)?;
        Ok(payload)
    }

    /// Appends one value to the end of the stream.
    pub fn write<T: Serialize + ?Sized>(&mut self, value: &T) -> BusResult<&mut Self> {
        let encoded = serde_json::to_string(value)?;
        self.buffer.push_str(&encoded);
        self.buffer.push('\n');
        Ok(self)
    }

    pub fn reader(&self) -> PayloadReader<'_> {
        PayloadReader {
            stream: serde_json::Deserializer::from_str(&self.buffer).into_iter(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Encoded size in bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_bytes()
    }

    /// Number of complete values in the stream.
    pub fn value_count(&self) -> usize {
        self.reader().stream.take_while(Result::is_ok).count()
    }
}

/// Sequential reader over a [`Payload`].
pub struct PayloadReader<'a> {
    stream: StreamDeserializer<'a, StrRead<'a>, Value>,
}

impl PayloadReader<'_> {
    /// Reads the next value in stream order.
    pub fn read<T: DeserializeOwned>(&mut self) -> BusResult<T> {
        match self.stream.next() {
            Some(value) => Ok(serde_json::from_value(value?)?),
            None => Err(BusError::PayloadExhausted),
        }
    }
}
