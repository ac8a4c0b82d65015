//! The traffic-logging interceptor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use interceptor::{
    Connection, ConnectionId, Envelope, Interceptor, InterceptorError, MessageType, Reader,
    SharedConnection, SharedReader, SharedWriter, Writer,
};

use crate::record::{Direction, TrafficRecord};
use crate::sink::{LogSink, SharedSink, SinkFactory};

struct LogState {
    peer_id: String,
    sinks: Vec<SharedSink>,
    token: CancellationToken,
}

struct Inner {
    token: CancellationToken,
    sink_factory: Arc<dyn SinkFactory>,
    states: Mutex<HashMap<ConnectionId, LogState>>,
}

/// Copies every envelope crossing a connection into that connection's sinks.
///
/// Logging is strictly best-effort: a failing sink is reported through
/// `tracing` and skipped, and never delays or drops the message itself.
pub struct LogInterceptor {
    inner: Arc<Inner>,
}

impl LogInterceptor {
    pub fn new(token: CancellationToken, sink_factory: Arc<dyn SinkFactory>) -> Self {
        Self {
            inner: Arc::new(Inner {
                token,
                sink_factory,
                states: Mutex::new(HashMap::new()),
            }),
        }
    }
}

#[async_trait]
impl Interceptor for LogInterceptor {
    async fn bind(
        &self,
        conn: SharedConnection,
        _writer: SharedWriter,
        _reader: SharedReader,
    ) -> Result<(), InterceptorError> {
        {
            let states = self.inner.states.lock().expect("states lock poisoned");
            if states.contains_key(&conn.id()) {
                return Err(InterceptorError::AlreadyBound);
            }
        }

        let sinks = self
            .inner
            .sink_factory
            .create(&conn.id().to_string())
            .await
            .map_err(InterceptorError::transport)?;

        let mut states = self.inner.states.lock().expect("states lock poisoned");
        if states.contains_key(&conn.id()) {
            return Err(InterceptorError::AlreadyBound);
        }
        states.insert(
            conn.id(),
            LogState {
                peer_id: "unknown".to_string(),
                sinks,
                token: self.inner.token.child_token(),
            },
        );

        Ok(())
    }

    fn intercept_writer(&self, writer: SharedWriter) -> SharedWriter {
        Arc::new(LogWriter {
            inner: self.inner.clone(),
            next: writer,
        })
    }

    fn intercept_reader(&self, reader: SharedReader) -> SharedReader {
        Arc::new(LogReader {
            inner: self.inner.clone(),
            next: reader,
        })
    }

    async fn unbind(&self, conn: &SharedConnection) {
        let state = {
            let mut states = self.inner.states.lock().expect("states lock poisoned");
            states.remove(&conn.id())
        };

        match state {
            Some(state) => {
                state.token.cancel();
                close_sinks(&state.sinks).await;
            }
            None => tracing::debug!(connection_id = %conn.id(), "unbind for unknown connection"),
        }
    }

    async fn close(&self) -> Result<(), InterceptorError> {
        self.inner.token.cancel();
        let drained: Vec<LogState> = {
            let mut states = self.inner.states.lock().expect("states lock poisoned");
            states.drain().map(|(_, state)| state).collect()
        };

        for state in drained {
            state.token.cancel();
            close_sinks(&state.sinks).await;
        }
        Ok(())
    }
}

async fn close_sinks(sinks: &[SharedSink]) {
    for sink in sinks {
        if let Err(err) = sink.close().await {
            tracing::warn!(%err, "failed to close traffic sink");
        }
    }
}

impl Inner {
    /// Snapshot the sinks and peer id for a connection; `None` when the
    /// connection is not bound.
    fn sinks_for(&self, conn: ConnectionId) -> Option<(Vec<SharedSink>, String)> {
        let states = self.states.lock().expect("states lock poisoned");
        states
            .get(&conn)
            .map(|state| (state.sinks.clone(), state.peer_id.clone()))
    }

    fn learn_peer(&self, conn: ConnectionId, peer_id: &str) {
        if peer_id.is_empty() || peer_id == "unknown" {
            return;
        }
        let mut states = self.states.lock().expect("states lock poisoned");
        if let Some(state) = states.get_mut(&conn) {
            if state.peer_id == "unknown" {
                state.peer_id = peer_id.to_string();
            }
        }
    }

    async fn fan_out(&self, conn: ConnectionId, direction: Direction, envelope: &Envelope) {
        let Some((sinks, peer_id)) = self.sinks_for(conn) else {
            return;
        };

        let record = TrafficRecord::new(direction, conn, peer_id, envelope);
        for sink in &sinks {
            if let Err(err) = sink.log(record.clone()).await {
                tracing::warn!(connection_id = %conn, %err, "traffic sink write failed");
            }
        }
    }
}

struct LogWriter {
    inner: Arc<Inner>,
    next: SharedWriter,
}

#[async_trait]
impl interceptor::Writer for LogWriter {
    async fn write(
        &self,
        conn: &SharedConnection,
        kind: MessageType,
        envelope: &Envelope,
    ) -> Result<(), InterceptorError> {
        self.inner
            .fan_out(conn.id(), Direction::Outbound, envelope)
            .await;
        self.next.write(conn, kind, envelope).await
    }
}

struct LogReader {
    inner: Arc<Inner>,
    next: SharedReader,
}

#[async_trait]
impl interceptor::Reader for LogReader {
    async fn read(
        &self,
        conn: &SharedConnection,
    ) -> Result<(MessageType, Envelope), InterceptorError> {
        let (kind, envelope) = self.next.read(conn).await?;
        self.inner.learn_peer(conn.id(), &envelope.header.sender_id);
        self.inner
            .fan_out(conn.id(), Direction::Inbound, &envelope)
            .await;
        Ok((kind, envelope))
    }
}
