//! The universal message envelope and the protocol registry.
//!
//! Every frame on the wire is a JSON object carrying a [`Header`] (sender,
//! receiver, protocol tag) plus an opaque payload. Interceptors that own a
//! protocol decode the envelope into their concrete message types through a
//! [`ProtocolRegistry`]; everything else treats the envelope as a pass-through
//! value. Unknown top-level fields round-trip losslessly so that a message
//! survives traversal through interceptors that do not understand it.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::InterceptorError;

/// A short string tag discriminating the payload shape of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Protocol(String);

/// The distinguished no-op carrier tag.
pub const PROTOCOL_NONE: &str = "none";

impl Protocol {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the `"none"` no-op carrier.
    pub fn is_none(&self) -> bool {
        self.0 == PROTOCOL_NONE
    }
}

impl From<&str> for Protocol {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for Protocol {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Protocol {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Envelope header identifying the endpoints and the payload protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "source_id")]
    pub sender_id: String,
    #[serde(rename = "destination_id")]
    pub receiver_id: String,
    pub protocol: Protocol,
}

impl Header {
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        protocol: impl Into<Protocol>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            protocol: protocol.into(),
        }
    }

    /// A header is valid when all three fields are non-empty.
    pub fn validate(&self) -> Result<(), InterceptorError> {
        if self.sender_id.is_empty() {
            return Err(InterceptorError::Validation("empty source_id".into()));
        }
        if self.receiver_id.is_empty() {
            return Err(InterceptorError::Validation("empty destination_id".into()));
        }
        if self.protocol.as_str().is_empty() {
            return Err(InterceptorError::Validation("empty protocol".into()));
        }
        Ok(())
    }
}

impl From<String> for Protocol {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

/// The universal container every interceptor sees.
///
/// `payload` is an opaque JSON value; its interpretation is determined by the
/// header's protocol tag. Protocol-specific top-level fields (as used by e.g.
/// the key-exchange messages) are captured in `extra` so the envelope
/// round-trips without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub header: Header,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Envelope {
    /// Build an envelope with a serialized payload.
    pub fn new(header: Header, payload: &impl Serialize) -> Result<Self, InterceptorError> {
        Ok(Self {
            header,
            payload: serde_json::to_value(payload)?,
            extra: serde_json::Map::new(),
        })
    }

    /// A payload-less envelope carrying the `"none"` protocol.
    pub fn none(sender_id: impl Into<String>, receiver_id: impl Into<String>) -> Self {
        Self {
            header: Header::new(sender_id, receiver_id, PROTOCOL_NONE),
            payload: serde_json::Value::Null,
            extra: serde_json::Map::new(),
        }
    }

    /// Re-encode a typed protocol message as a generic envelope.
    ///
    /// The message's own header fields flatten into the envelope header and
    /// any protocol-specific top-level fields land in `extra`, preserving the
    /// exact wire shape of the typed message.
    pub fn encode<T: Serialize>(message: &T) -> Result<Self, InterceptorError> {
        let value = serde_json::to_value(message)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Decode the full envelope (header, payload and extra fields) into a
    /// typed protocol message.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, InterceptorError> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Decode only the `payload` value.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, InterceptorError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn protocol(&self) -> &Protocol {
        &self.header.protocol
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, InterceptorError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, InterceptorError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Decoder function turning a generic envelope into a typed payload.
pub type DecodeFn<P> = fn(&Envelope) -> Result<P, InterceptorError>;

/// Maps protocol tags to payload decoders.
///
/// Each interceptor owns one registry over its own closed payload type and
/// consults it at exactly one point: when an inbound envelope's tag is looked
/// up. Unknown tags are not an error here; the caller passes the envelope
/// through unchanged so later interceptors or the application can handle it.
pub struct ProtocolRegistry<P> {
    decoders: HashMap<Protocol, DecodeFn<P>>,
}

impl<P> ProtocolRegistry<P> {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    pub fn register(&mut self, protocol: impl Into<Protocol>, decode: DecodeFn<P>) {
        self.decoders.insert(protocol.into(), decode);
    }

    /// Whether any decoder is registered for the tag.
    pub fn owns(&self, protocol: &Protocol) -> bool {
        self.decoders.contains_key(protocol)
    }

    /// Look up the envelope's tag and run the matching decoder.
    ///
    /// Returns `None` when the tag is not owned by this registry.
    pub fn decode(&self, envelope: &Envelope) -> Option<Result<P, InterceptorError>> {
        self.decoders
            .get(envelope.protocol())
            .map(|decode| decode(envelope))
    }
}

impl<P> Default for ProtocolRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Serde helpers encoding binary fields as standard base64 strings.
pub mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Like [`b64`] but for fixed-size byte arrays; decoding rejects any input
/// whose decoded length differs from the array size.
pub mod b64_array {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let decoded = STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        decoded.try_into().map_err(|bytes: Vec<u8>| {
            serde::de::Error::custom(format!("expected {N} bytes, got {}", bytes.len()))
        })
    }
}
