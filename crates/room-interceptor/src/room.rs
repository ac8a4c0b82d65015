//! A single room: membership, allow-listing, and fan-out.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use interceptor::{
    Connection, ConnectionId, Envelope, MessageType, SharedConnection, SharedWriter, Writer,
};

use crate::messages::RoomMessage;

/// Failures of room operations, reported back to the requesting client as
/// `error` envelopes.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room '{0}' does not exist")]
    UnknownRoom(String),

    #[error("participant not allowed")]
    NotAllowed,

    #[error("participant already exists")]
    DuplicateParticipant,

    #[error("participant does not exist")]
    UnknownParticipant,

    #[error("sender is not a participant of room '{0}'")]
    NotParticipant(String),

    #[error("failed to deliver to '{0}': {1}")]
    Delivery(String, String),
}

/// A member of a room: its connection plus the full-stack writer used to
/// reach it.
#[derive(Clone)]
pub struct Participant {
    pub conn: SharedConnection,
    pub writer: SharedWriter,
}

struct RoomInner {
    /// Connection that created the room; cleared (not destroying the room)
    /// when the owner leaves or disconnects.
    owner: Option<ConnectionId>,
    /// Ids permitted to join; empty means open.
    allowed: Vec<String>,
    participants: HashMap<String, Participant>,
    last_activity: DateTime<Utc>,
}

/// A room with its own lock and lifetime.
///
/// The lock is held across fan-outs so every recipient observes the room's
/// messages in the same order; the lock order is always interceptor before
/// room, never the reverse.
pub struct Room {
    id: String,
    ttl: Duration,
    created: DateTime<Utc>,
    token: CancellationToken,
    inner: Mutex<RoomInner>,
}

impl Room {
    /// Create a room owned by `owner`, with the creator as the sole initial
    /// participant.
    pub fn new(
        id: impl Into<String>,
        ttl: Duration,
        parent: &CancellationToken,
        allowed: Vec<String>,
        owner_id: impl Into<String>,
        owner: Participant,
    ) -> Self {
        let owner_conn = owner.conn.id();
        let mut participants = HashMap::new();
        participants.insert(owner_id.into(), owner);

        Self {
            id: id.into(),
            ttl,
            created: Utc::now(),
            token: parent.child_token(),
            inner: Mutex::new(RoomInner {
                owner: Some(owner_conn),
                allowed,
                participants,
                last_activity: Utc::now(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub async fn owner(&self) -> Option<ConnectionId> {
        self.inner.lock().await.owner
    }

    pub async fn participant_ids(&self) -> Vec<String> {
        self.inner.lock().await.participants.keys().cloned().collect()
    }

    /// Clear the owner if it is the given connection; the room itself lives
    /// on until its TTL.
    pub async fn clear_owner(&self, conn: ConnectionId) {
        let mut inner = self.inner.lock().await;
        if inner.owner == Some(conn) {
            tracing::warn!(room_id = %self.id, "room owner disconnected; room survives until ttl");
            inner.owner = None;
        }
    }

    /// Add a participant, honoring the allow-list, and notify the other
    /// members.
    pub async fn add(
        &self,
        client_id: &str,
        participant: Participant,
    ) -> Result<(), RoomError> {
        let mut inner = self.inner.lock().await;

        if !inner.allowed.is_empty() && !inner.allowed.iter().any(|id| id == client_id) {
            return Err(RoomError::NotAllowed);
        }
        if inner.participants.contains_key(client_id) {
            return Err(RoomError::DuplicateParticipant);
        }

        inner.participants.insert(client_id.to_string(), participant);
        inner.last_activity = Utc::now();

        let joined_at = Utc::now();
        let notify = RoomMessage::client_joined("", &self.id, client_id, joined_at);
        fan_out_notification(&inner.participants, client_id, notify).await;

        Ok(())
    }

    /// Remove a participant and notify the remaining members. A leaving
    /// owner only clears the owner slot; the room survives until its TTL.
    pub async fn remove(&self, client_id: &str, conn: ConnectionId) -> Result<(), RoomError> {
        let mut inner = self.inner.lock().await;

        if inner.owner == Some(conn) {
            tracing::warn!(room_id = %self.id, "room owner is leaving; room survives until ttl");
            inner.owner = None;
        }

        if inner.participants.remove(client_id).is_none() {
            return Err(RoomError::UnknownParticipant);
        }
        inner.last_activity = Utc::now();

        let left_at = Utc::now();
        let notify = RoomMessage::client_left("", &self.id, client_id, left_at);
        fan_out_notification(&inner.participants, client_id, notify).await;

        Ok(())
    }

    /// Deliver a chat to its recipients.
    ///
    /// The sender is resolved by connection, not by header, so a client
    /// cannot speak as someone else. Empty `recipient_ids` broadcasts to the
    /// allow-list, excluding the sender and the room owner — the owner's
    /// create-time membership is administrative and does not subscribe it to
    /// broadcasts; a directed message (explicit `recipient_ids`) can still
    /// reach it. Recipients that are not current participants are skipped;
    /// actual delivery failures are collected and returned together with the
    /// resolved sender id — one failing recipient never aborts the fan-out.
    pub async fn send_chat(
        &self,
        sender_conn: ConnectionId,
        message_id: &str,
        recipient_ids: &[String],
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(String, Vec<RoomError>), RoomError> {
        let mut inner = self.inner.lock().await;

        let sender_id = inner
            .participants
            .iter()
            .find(|(_, p)| p.conn.id() == sender_conn)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| RoomError::NotParticipant(self.id.clone()))?;

        let recipients: Vec<String> = if recipient_ids.is_empty() {
            let owner_id = inner.owner.and_then(|owner| {
                inner
                    .participants
                    .iter()
                    .find(|(_, p)| p.conn.id() == owner)
                    .map(|(id, _)| id.clone())
            });
            inner
                .allowed
                .iter()
                .filter(|id| owner_id.as_deref() != Some(id.as_str()))
                .cloned()
                .collect()
        } else {
            recipient_ids.to_vec()
        };

        let mut failures = Vec::new();
        for recipient in recipients.iter().filter(|id| **id != sender_id) {
            let Some(participant) = inner.participants.get(recipient) else {
                tracing::debug!(
                    room_id = %self.id,
                    %recipient,
                    "skipping chat recipient that has not joined"
                );
                continue;
            };

            let delivery = RoomMessage::chat_dest(
                &sender_id,
                recipient,
                &self.id,
                message_id,
                content,
                timestamp,
            );
            if let Err(err) = write_room_message(participant, &delivery).await {
                failures.push(RoomError::Delivery(recipient.clone(), err));
            }
        }

        inner.last_activity = Utc::now();
        Ok((sender_id, failures))
    }

    /// Cancel the room's context and drop all membership. No synthetic
    /// `client_left` messages are sent.
    pub async fn close(&self) {
        self.token.cancel();
        let mut inner = self.inner.lock().await;
        inner.owner = None;
        inner.allowed.clear();
        inner.participants.clear();
    }
}

/// Send a room-originated notification to every participant except `except`.
/// Failures are logged and skipped; notifications are best-effort.
async fn fan_out_notification(
    participants: &HashMap<String, Participant>,
    except: &str,
    message: RoomMessage,
) {
    for (id, participant) in participants {
        if id == except {
            continue;
        }

        let mut addressed = message.clone();
        addressed.header.receiver_id = id.clone();
        if let Err(err) = write_room_message(participant, &addressed).await {
            tracing::warn!(recipient = %id, %err, "failed to deliver room notification");
        }
    }
}

async fn write_room_message(
    participant: &Participant,
    message: &RoomMessage,
) -> Result<(), String> {
    let envelope = Envelope::encode(message).map_err(|e| e.to_string())?;
    participant
        .writer
        .write(&participant.conn, MessageType::Text, &envelope)
        .await
        .map_err(|e| e.to_string())
}
