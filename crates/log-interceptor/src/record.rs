use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use interceptor::{ConnectionId, Envelope};

/// Which way the recorded message was travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One intercepted message as it appears in a traffic log.
///
/// Serialized as a single newline-terminated JSON object, producing a
/// JSON-lines stream that is easy to ship, parse, and replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficRecord {
    pub id: uuid::Uuid,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub connection_id: String,
    pub peer_id: String,
    pub envelope: Envelope,
}

impl TrafficRecord {
    pub fn new(
        direction: Direction,
        connection_id: ConnectionId,
        peer_id: impl Into<String>,
        envelope: &Envelope,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: Utc::now(),
            direction,
            connection_id: connection_id.to_string(),
            peer_id: peer_id.into(),
            envelope: envelope.clone(),
        }
    }
}
