//! Wire messages owned by the room interceptor.
//!
//! Everything travels under the single `"room"` protocol tag with a nested
//! `type` discriminator selecting one of the nine sub-messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use interceptor::{Header, InterceptorError};

pub const PROTOCOL_ROOM: &str = "room";

/// Sender id used on replies and room-originated notifications.
pub const SERVER_SENDER: &str = "server";

/// A room-protocol envelope: header plus one of the sub-messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMessage {
    #[serde(flatten)]
    pub header: Header,
    pub payload: RoomPayload,
}

/// The nine sub-messages of the room protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomPayload {
    /// Open a room. If the room already exists the sender is joined to it
    /// instead.
    CreateRoom {
        room_id: String,
        /// Room time-to-live in seconds; expiry closes the room regardless
        /// of who is still in it.
        close_after_secs: u64,
        /// Ids permitted to join; empty means the room is open.
        #[serde(default)]
        clients_to_allow: Vec<String>,
    },
    JoinRoom {
        room_id: String,
    },
    LeaveRoom {
        room_id: String,
    },
    /// A chat message as submitted by a participant. Empty `recipient_ids`
    /// broadcasts to the room's allow-list.
    ChatSource {
        room_id: String,
        message_id: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        recipient_ids: Vec<String>,
        content: String,
        timestamp: DateTime<Utc>,
    },
    /// A chat message as delivered to a recipient.
    ChatDest {
        room_id: String,
        message_id: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    ClientJoined {
        room_id: String,
        client_id: String,
        joined_at: DateTime<Utc>,
    },
    ClientLeft {
        room_id: String,
        client_id: String,
        left_at: DateTime<Utc>,
    },
    Success {
        #[serde(rename = "success_message")]
        message: String,
    },
    Error {
        #[serde(rename = "error_message")]
        message: String,
    },
}

impl RoomPayload {
    pub fn validate(&self) -> Result<(), InterceptorError> {
        let invalid = |what: &str| Err(InterceptorError::Validation(what.into()));
        match self {
            RoomPayload::CreateRoom { room_id, .. } if room_id.is_empty() => {
                invalid("create_room without room_id")
            }
            RoomPayload::JoinRoom { room_id } if room_id.is_empty() => {
                invalid("join_room without room_id")
            }
            RoomPayload::LeaveRoom { room_id } if room_id.is_empty() => {
                invalid("leave_room without room_id")
            }
            RoomPayload::ChatSource {
                room_id,
                message_id,
                content,
                ..
            } if room_id.is_empty() || message_id.is_empty() || content.is_empty() => {
                invalid("chat_source missing room_id, message_id or content")
            }
            _ => Ok(()),
        }
    }
}

impl RoomMessage {
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        payload: RoomPayload,
    ) -> Self {
        Self {
            header: Header::new(sender_id, receiver_id, PROTOCOL_ROOM),
            payload,
        }
    }

    /// Success ack from the room layer to a client.
    pub fn success(receiver_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            SERVER_SENDER,
            receiver_id,
            RoomPayload::Success {
                message: message.into(),
            },
        )
    }

    /// Error report from the room layer to a client.
    pub fn error(receiver_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            SERVER_SENDER,
            receiver_id,
            RoomPayload::Error {
                message: message.into(),
            },
        )
    }

    /// A chat delivery, addressed from the original sender to one recipient.
    pub fn chat_dest(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        room_id: impl Into<String>,
        message_id: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(
            sender_id,
            receiver_id,
            RoomPayload::ChatDest {
                room_id: room_id.into(),
                message_id: message_id.into(),
                content: content.into(),
                timestamp,
            },
        )
    }

    pub fn client_joined(
        receiver_id: impl Into<String>,
        room_id: impl Into<String>,
        client_id: impl Into<String>,
        joined_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            SERVER_SENDER,
            receiver_id,
            RoomPayload::ClientJoined {
                room_id: room_id.into(),
                client_id: client_id.into(),
                joined_at,
            },
        )
    }

    pub fn client_left(
        receiver_id: impl Into<String>,
        room_id: impl Into<String>,
        client_id: impl Into<String>,
        left_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            SERVER_SENDER,
            receiver_id,
            RoomPayload::ClientLeft {
                room_id: room_id.into(),
                client_id: client_id.into(),
                left_at,
            },
        )
    }
}
