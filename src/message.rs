use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Reply value the default handler answers with
pub const ACK: &str = "OK";

/// Default wire envelope for queue messages.
///
/// Handlers are free to interpret the raw body however they like; only the
/// default envelope handler assumes this shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Routing/dispatch tag
    pub pattern: String,
    /// Arbitrary JSON payload
    pub data: serde_json::Value,
}

impl Envelope {
    /// Create a new envelope
    pub fn new(pattern: impl Into<String>, data: impl Serialize) -> Result<Self> {
        Ok(Self {
            pattern: pattern.into(),
            data: serde_json::to_value(data)?,
        })
    }

    /// Serialize the envelope to bytes for transmission
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize an envelope from a raw delivery body
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Deserialize the payload to a specific type
    pub fn deserialize_data<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}
