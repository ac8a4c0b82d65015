//! Wire messages owned by the ping interceptor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use interceptor::{Envelope, Header, InterceptorError, ProtocolRegistry};

/// Protocol tag of the periodic liveness message.
pub const PROTOCOL_PING: &str = "iamserver";
/// Protocol tag of the answer to a liveness message.
pub const PROTOCOL_PONG: &str = "pong";

/// Liveness probe. The message id matches the probe to its answer and the
/// timestamp anchors the round-trip measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    #[serde(flatten)]
    pub header: Header,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Ping {
    pub fn new(sender_id: impl Into<String>, receiver_id: impl Into<String>) -> Self {
        Self {
            header: Header::new(sender_id, receiver_id, PROTOCOL_PING),
            message_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<(), InterceptorError> {
        if self.message_id.is_empty() {
            return Err(InterceptorError::Validation("empty message_id".into()));
        }
        self.header.validate()
    }
}

/// Answer to a [`Ping`], echoing the probe's id and timestamp so the prober
/// can compute the round-trip time without keeping the probe around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    #[serde(flatten)]
    pub header: Header,
    pub message_id: String,
    pub ping_timestamp: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

impl Pong {
    /// Build the answer to `ping`, addressed back at its sender.
    pub fn reply_to(sender_id: impl Into<String>, ping: &Ping) -> Self {
        Self {
            header: Header::new(sender_id, ping.header.sender_id.clone(), PROTOCOL_PONG),
            message_id: ping.message_id.clone(),
            ping_timestamp: ping.timestamp,
            timestamp: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<(), InterceptorError> {
        if self.message_id.is_empty() {
            return Err(InterceptorError::Validation("empty message_id".into()));
        }
        self.header.validate()
    }
}

/// The decoded payloads this interceptor dispatches on.
pub enum PingPayload {
    Ping(Ping),
    Pong(Pong),
}

pub fn registry() -> ProtocolRegistry<PingPayload> {
    let mut registry = ProtocolRegistry::new();
    registry.register(PROTOCOL_PING, |envelope: &Envelope| {
        envelope.decode::<Ping>().map(PingPayload::Ping)
    });
    registry.register(PROTOCOL_PONG, |envelope: &Envelope| {
        envelope.decode::<Pong>().map(PingPayload::Pong)
    });
    registry
}
