//! The liveness interceptor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use interceptor::{
    Connection, ConnectionId, Envelope, Interceptor, InterceptorError, MessageType,
    ProtocolRegistry, Reader, SharedConnection, SharedReader, SharedWriter, Writer,
};

use crate::messages::{self, Ping, PingPayload, Pong, PROTOCOL_PING};
use crate::stats::{PingStats, PingStatsSnapshot};

struct PingState {
    /// Peer identity; `"unknown"` until the first pong names it.
    peer_id: String,
    /// Full-stack writer so probes traverse the whole pipeline.
    writer: SharedWriter,
    token: CancellationToken,
    stats: Arc<Mutex<PingStats>>,
}

struct Inner {
    id: String,
    interval: Duration,
    max_history: u16,
    emit: bool,
    token: CancellationToken,
    registry: ProtocolRegistry<PingPayload>,
    states: Mutex<HashMap<ConnectionId, PingState>>,
}

/// Periodically probes each bound connection and tracks round-trip
/// statistics from the answers. Inbound probes from the peer are answered
/// automatically.
pub struct PingInterceptor {
    inner: Arc<Inner>,
}

impl PingInterceptor {
    pub fn new(
        token: CancellationToken,
        id: impl Into<String>,
        interval: Duration,
        max_history: u16,
        emit: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                interval,
                max_history,
                emit,
                token,
                registry: messages::registry(),
                states: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Current liveness statistics for a connection, if it is bound.
    pub fn stats(&self, conn: ConnectionId) -> Option<PingStatsSnapshot> {
        let states = self.inner.states.lock().expect("states lock poisoned");
        states
            .get(&conn)
            .map(|state| state.stats.lock().expect("stats lock poisoned").snapshot())
    }
}

#[async_trait]
impl Interceptor for PingInterceptor {
    async fn bind(
        &self,
        conn: SharedConnection,
        writer: SharedWriter,
        _reader: SharedReader,
    ) -> Result<(), InterceptorError> {
        let token = {
            let mut states = self.inner.states.lock().expect("states lock poisoned");
            if states.contains_key(&conn.id()) {
                return Err(InterceptorError::AlreadyBound);
            }

            let token = self.inner.token.child_token();
            states.insert(
                conn.id(),
                PingState {
                    peer_id: "unknown".to_string(),
                    writer,
                    token: token.clone(),
                    stats: Arc::new(Mutex::new(PingStats::new(self.inner.max_history))),
                },
            );
            token
        };

        if self.inner.emit {
            tokio::spawn(ping_loop(self.inner.clone(), conn, token));
        }

        Ok(())
    }

    fn intercept_writer(&self, writer: SharedWriter) -> SharedWriter {
        Arc::new(PingWriter {
            inner: self.inner.clone(),
            next: writer,
        })
    }

    fn intercept_reader(&self, reader: SharedReader) -> SharedReader {
        Arc::new(PingReader {
            inner: self.inner.clone(),
            next: reader,
        })
    }

    async fn unbind(&self, conn: &SharedConnection) {
        let mut states = self.inner.states.lock().expect("states lock poisoned");
        match states.remove(&conn.id()) {
            Some(state) => state.token.cancel(),
            None => tracing::debug!(connection_id = %conn.id(), "unbind for unknown connection"),
        }
    }

    async fn close(&self) -> Result<(), InterceptorError> {
        self.inner.token.cancel();
        let mut states = self.inner.states.lock().expect("states lock poisoned");
        for state in states.values() {
            state.token.cancel();
        }
        states.clear();
        Ok(())
    }
}

/// Background probe loop for one connection; lives until the connection's
/// token is cancelled.
async fn ping_loop(inner: Arc<Inner>, conn: SharedConnection, token: CancellationToken) {
    let start = tokio::time::Instant::now() + inner.interval;
    let mut ticker = tokio::time::interval_at(start, inner.interval);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {
                let (writer, peer_id) = {
                    let states = inner.states.lock().expect("states lock poisoned");
                    match states.get(&conn.id()) {
                        Some(state) => (state.writer.clone(), state.peer_id.clone()),
                        None => return,
                    }
                };

                let ping = Ping::new(&inner.id, &peer_id);
                let envelope = match Envelope::encode(&ping) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        tracing::error!(%err, "failed to encode ping");
                        continue;
                    }
                };

                if let Err(err) = writer.write(&conn, MessageType::Text, &envelope).await {
                    tracing::warn!(connection_id = %conn.id(), %err, "failed to send ping");
                }
            }
        }
    }
}

/// Stamps outgoing probes with the known peer id and counts them.
struct PingWriter {
    inner: Arc<Inner>,
    next: SharedWriter,
}

#[async_trait]
impl interceptor::Writer for PingWriter {
    async fn write(
        &self,
        conn: &SharedConnection,
        kind: MessageType,
        envelope: &Envelope,
    ) -> Result<(), InterceptorError> {
        if *envelope.protocol() != *PROTOCOL_PING {
            return self.next.write(conn, kind, envelope).await;
        }

        let peer_id = {
            let states = self.inner.states.lock().expect("states lock poisoned");
            states.get(&conn.id()).map(|state| {
                state
                    .stats
                    .lock()
                    .expect("stats lock poisoned")
                    .record_sent();
                state.peer_id.clone()
            })
        };

        let Some(peer_id) = peer_id else {
            return self.next.write(conn, kind, envelope).await;
        };

        let mut stamped = envelope.clone();
        stamped.header.receiver_id = peer_id;
        self.next.write(conn, kind, &stamped).await
    }
}

/// Records answers and answers inbound probes.
struct PingReader {
    inner: Arc<Inner>,
    next: SharedReader,
}

#[async_trait]
impl interceptor::Reader for PingReader {
    async fn read(
        &self,
        conn: &SharedConnection,
    ) -> Result<(MessageType, Envelope), InterceptorError> {
        let (kind, envelope) = self.next.read(conn).await?;

        match self.inner.registry.decode(&envelope) {
            Some(Ok(PingPayload::Pong(pong))) => {
                if let Err(err) = pong.validate() {
                    tracing::warn!(connection_id = %conn.id(), %err, "dropping invalid pong");
                    return Ok((kind, envelope));
                }
                let states = self.inner.states.lock().expect("states lock poisoned");
                if let Some(state) = states.get(&conn.id()) {
                    state
                        .stats
                        .lock()
                        .expect("stats lock poisoned")
                        .record_pong(&pong);
                }
                drop(states);
                self.learn_peer(conn, &pong.header.sender_id);
            }
            Some(Ok(PingPayload::Ping(ping))) => {
                if let Err(err) = ping.validate() {
                    tracing::warn!(connection_id = %conn.id(), %err, "dropping invalid ping");
                    return Ok((kind, envelope));
                }
                self.learn_peer(conn, &ping.header.sender_id);
                self.answer(conn, &ping).await;
            }
            Some(Err(err)) => {
                tracing::warn!(connection_id = %conn.id(), %err, "undecodable liveness message");
            }
            None => {}
        }

        Ok((kind, envelope))
    }
}

impl PingReader {
    fn learn_peer(&self, conn: &SharedConnection, peer_id: &str) {
        if peer_id.is_empty() {
            return;
        }
        let mut states = self.inner.states.lock().expect("states lock poisoned");
        if let Some(state) = states.get_mut(&conn.id()) {
            state.peer_id = peer_id.to_string();
        }
    }

    async fn answer(&self, conn: &SharedConnection, ping: &Ping) {
        let writer = {
            let states = self.inner.states.lock().expect("states lock poisoned");
            match states.get(&conn.id()) {
                Some(state) => state.writer.clone(),
                None => return,
            }
        };

        let pong = Pong::reply_to(&self.inner.id, ping);
        let envelope = match Envelope::encode(&pong) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::error!(%err, "failed to encode pong");
                return;
            }
        };

        if let Err(err) = writer.write(conn, MessageType::Text, &envelope).await {
            tracing::warn!(connection_id = %conn.id(), %err, "failed to answer ping");
        }
    }
}
