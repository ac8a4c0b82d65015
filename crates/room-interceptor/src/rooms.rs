//! The room interceptor: registry of rooms plus per-connection state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use interceptor::{
    Connection, ConnectionId, Envelope, Interceptor, InterceptorError, MessageType, Reader,
    SharedConnection, SharedReader, SharedWriter, Writer,
};

use crate::messages::{RoomMessage, RoomPayload, PROTOCOL_ROOM};
use crate::room::{Participant, Room, RoomError};

struct RoomConnState {
    writer: SharedWriter,
}

struct Inner {
    token: CancellationToken,
    rooms: Arc<Mutex<HashMap<String, Arc<Room>>>>,
    states: std::sync::Mutex<HashMap<ConnectionId, RoomConnState>>,
}

/// Room-based multicast over intercepted connections.
///
/// The interceptor absorbs nothing: room messages are processed as they pass
/// through the reader and continue up the chain unchanged, while replies
/// (success/error envelopes) and fan-outs go out through the full-stack
/// writers captured at bind time.
pub struct RoomInterceptor {
    inner: Arc<Inner>,
}

impl RoomInterceptor {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                token,
                rooms: Arc::new(Mutex::new(HashMap::new())),
                states: std::sync::Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The room with the given id, if it is currently alive.
    pub async fn room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.inner.rooms.lock().await.get(room_id).cloned()
    }
}

#[async_trait]
impl Interceptor for RoomInterceptor {
    async fn bind(
        &self,
        conn: SharedConnection,
        writer: SharedWriter,
        _reader: SharedReader,
    ) -> Result<(), InterceptorError> {
        let mut states = self.inner.states.lock().expect("states lock poisoned");
        if states.contains_key(&conn.id()) {
            return Err(InterceptorError::AlreadyBound);
        }
        states.insert(conn.id(), RoomConnState { writer });
        Ok(())
    }

    fn intercept_reader(&self, reader: SharedReader) -> SharedReader {
        Arc::new(RoomReader {
            inner: self.inner.clone(),
            next: reader,
        })
    }

    /// Drop the connection's state and clear its ownership of any rooms.
    /// Joined rooms keep the stale membership entry until the room's TTL or
    /// an explicit leave; the room itself always survives its owner.
    async fn unbind(&self, conn: &SharedConnection) {
        let removed = {
            let mut states = self.inner.states.lock().expect("states lock poisoned");
            states.remove(&conn.id()).is_some()
        };
        if !removed {
            tracing::debug!(connection_id = %conn.id(), "unbind for unknown connection");
        }

        let rooms: Vec<Arc<Room>> = self.inner.rooms.lock().await.values().cloned().collect();
        for room in rooms {
            room.clear_owner(conn.id()).await;
        }
    }

    async fn close(&self) -> Result<(), InterceptorError> {
        self.inner.token.cancel();

        let drained: Vec<Arc<Room>> = {
            let mut rooms = self.inner.rooms.lock().await;
            rooms.drain().map(|(_, room)| room).collect()
        };
        for room in drained {
            room.close().await;
        }

        self.inner
            .states
            .lock()
            .expect("states lock poisoned")
            .clear();
        Ok(())
    }
}

struct RoomReader {
    inner: Arc<Inner>,
    next: SharedReader,
}

#[async_trait]
impl interceptor::Reader for RoomReader {
    async fn read(
        &self,
        conn: &SharedConnection,
    ) -> Result<(MessageType, Envelope), InterceptorError> {
        let (kind, envelope) = self.next.read(conn).await?;

        if *envelope.protocol() != *PROTOCOL_ROOM {
            return Ok((kind, envelope));
        }

        let message: RoomMessage = match envelope.decode() {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(connection_id = %conn.id(), %err, "undecodable room message");
                return Ok((kind, envelope));
            }
        };

        let writer = {
            let states = self.inner.states.lock().expect("states lock poisoned");
            states.get(&conn.id()).map(|state| state.writer.clone())
        };
        let Some(writer) = writer else {
            tracing::warn!(connection_id = %conn.id(), "room message from unbound connection");
            return Ok((kind, envelope));
        };

        self.inner.process(conn, &writer, message).await;
        Ok((kind, envelope))
    }
}

impl Inner {
    /// Dispatch one room message. All failures are answered with `error`
    /// envelopes on the requesting connection; nothing here fails the read
    /// path.
    async fn process(&self, conn: &SharedConnection, writer: &SharedWriter, message: RoomMessage) {
        let sender_id = message.header.sender_id.clone();

        if let Err(err) = message.payload.validate() {
            tracing::warn!(connection_id = %conn.id(), %err, "invalid room message");
            self.reply(conn, writer, RoomMessage::error(&sender_id, err.to_string()))
                .await;
            return;
        }

        match message.payload {
            RoomPayload::CreateRoom {
                room_id,
                close_after_secs,
                clients_to_allow,
            } => {
                self.create_room(
                    conn,
                    writer,
                    &sender_id,
                    room_id,
                    Duration::from_secs(close_after_secs),
                    clients_to_allow,
                )
                .await;
            }
            RoomPayload::JoinRoom { room_id } => {
                self.join_room(conn, writer, &sender_id, &room_id).await;
            }
            RoomPayload::LeaveRoom { room_id } => {
                self.leave_room(conn, writer, &sender_id, &room_id).await;
            }
            RoomPayload::ChatSource {
                room_id,
                message_id,
                recipient_ids,
                content,
                timestamp,
            } => {
                self.chat(
                    conn,
                    writer,
                    &sender_id,
                    &room_id,
                    &message_id,
                    &recipient_ids,
                    &content,
                    timestamp,
                )
                .await;
            }
            // Terminal payloads: delivered to the application, nothing for
            // the room layer to do.
            RoomPayload::ChatDest { .. }
            | RoomPayload::ClientJoined { .. }
            | RoomPayload::ClientLeft { .. }
            | RoomPayload::Success { .. }
            | RoomPayload::Error { .. } => {}
        }
    }

    async fn create_room(
        &self,
        conn: &SharedConnection,
        writer: &SharedWriter,
        sender_id: &str,
        room_id: String,
        ttl: Duration,
        clients_to_allow: Vec<String>,
    ) {
        let mut rooms = self.rooms.lock().await;

        // An existing room turns the request into a join.
        if let Some(room) = rooms.get(&room_id).cloned() {
            drop(rooms);
            tracing::debug!(%room_id, "room already exists; joining instead");
            self.join_existing(conn, writer, sender_id, &room).await;
            return;
        }

        let room = Arc::new(Room::new(
            room_id.clone(),
            ttl,
            &self.token,
            clients_to_allow,
            sender_id,
            Participant {
                conn: conn.clone(),
                writer: writer.clone(),
            },
        ));
        rooms.insert(room_id.clone(), room.clone());
        drop(rooms);

        // TTL expiry closes the room no matter who is still in it; an early
        // close cancels the timer instead.
        let registry = self.rooms.clone();
        let expiring = room.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = expiring.token().cancelled() => {}
                _ = tokio::time::sleep(expiring.ttl()) => {
                    tracing::debug!(room_id = %expiring.id(), "room ttl expired");
                    registry.lock().await.remove(expiring.id());
                    expiring.close().await;
                }
            }
        });

        self.reply(
            conn,
            writer,
            RoomMessage::success(sender_id, format!("room {room_id} created successfully")),
        )
        .await;
    }

    async fn join_room(
        &self,
        conn: &SharedConnection,
        writer: &SharedWriter,
        sender_id: &str,
        room_id: &str,
    ) {
        let room = self.rooms.lock().await.get(room_id).cloned();
        match room {
            Some(room) => self.join_existing(conn, writer, sender_id, &room).await,
            None => {
                self.reply(
                    conn,
                    writer,
                    RoomMessage::error(sender_id, RoomError::UnknownRoom(room_id.into()).to_string()),
                )
                .await;
            }
        }
    }

    async fn join_existing(
        &self,
        conn: &SharedConnection,
        writer: &SharedWriter,
        sender_id: &str,
        room: &Arc<Room>,
    ) {
        let participant = Participant {
            conn: conn.clone(),
            writer: writer.clone(),
        };
        let reply = match room.add(sender_id, participant).await {
            Ok(()) => RoomMessage::success(
                sender_id,
                format!("joined room {} successfully", room.id()),
            ),
            Err(err) => RoomMessage::error(sender_id, err.to_string()),
        };
        self.reply(conn, writer, reply).await;
    }

    async fn leave_room(
        &self,
        conn: &SharedConnection,
        writer: &SharedWriter,
        sender_id: &str,
        room_id: &str,
    ) {
        let room = self.rooms.lock().await.get(room_id).cloned();
        let reply = match room {
            Some(room) => match room.remove(sender_id, conn.id()).await {
                Ok(()) => {
                    RoomMessage::success(sender_id, format!("left room {room_id} successfully"))
                }
                Err(err) => RoomMessage::error(sender_id, err.to_string()),
            },
            None => RoomMessage::error(sender_id, RoomError::UnknownRoom(room_id.into()).to_string()),
        };
        self.reply(conn, writer, reply).await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn chat(
        &self,
        conn: &SharedConnection,
        writer: &SharedWriter,
        sender_id: &str,
        room_id: &str,
        message_id: &str,
        recipient_ids: &[String],
        content: &str,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) {
        let Some(room) = self.rooms.lock().await.get(room_id).cloned() else {
            self.reply(
                conn,
                writer,
                RoomMessage::error(sender_id, RoomError::UnknownRoom(room_id.into()).to_string()),
            )
            .await;
            return;
        };

        match room
            .send_chat(conn.id(), message_id, recipient_ids, content, timestamp)
            .await
        {
            Ok((verified_sender, failures)) => {
                for failure in &failures {
                    self.reply(
                        conn,
                        writer,
                        RoomMessage::error(&verified_sender, failure.to_string()),
                    )
                    .await;
                }
                self.reply(
                    conn,
                    writer,
                    RoomMessage::success(
                        &verified_sender,
                        format!("message {message_id} delivered in room {room_id}"),
                    ),
                )
                .await;
            }
            Err(err) => {
                self.reply(conn, writer, RoomMessage::error(sender_id, err.to_string()))
                    .await;
            }
        }
    }

    async fn reply(&self, conn: &SharedConnection, writer: &SharedWriter, message: RoomMessage) {
        let envelope = match Envelope::encode(&message) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::error!(%err, "failed to encode room reply");
                return;
            }
        };
        if let Err(err) = writer.write(conn, MessageType::Text, &envelope).await {
            tracing::warn!(connection_id = %conn.id(), %err, "failed to send room reply");
        }
    }
}
