//! WebSocket binding for the interceptor pipeline.
//!
//! [`WsConnection`] adapts an accepted `tokio_tungstenite` stream to the
//! core [`Connection`] capability: text and binary frames map to
//! [`MessageType`], transport-level ping/pong frames are ignored (the
//! application-level liveness interceptor is additive, not a replacement for
//! them), and a close frame or EOF surfaces as a closed connection.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use interceptor::{Connection, ConnectionId, InterceptorError, MessageType};

/// A [`Connection`] over an accepted WebSocket stream.
///
/// The sink and stream halves sit behind their own locks: writes from racing
/// callers (application, pinger, rekeyer) are serialized here, at the bottom
/// of the stack.
pub struct WsConnection<S> {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
}

impl<S> WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(ws: WebSocketStream<S>) -> Arc<Self> {
        let (sink, stream) = ws.split();
        Arc::new(Self {
            id: ConnectionId::new(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }
}

#[async_trait]
impl<S> Connection for WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn read(&self) -> Result<(MessageType, Vec<u8>), InterceptorError> {
        let mut stream = self.stream.lock().await;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok((MessageType::Text, text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok((MessageType::Binary, data.to_vec()));
                }
                // Protocol-level keepalive; tungstenite answers pings for
                // us, nothing to surface.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => {
                    return Err(InterceptorError::ConnectionClosed);
                }
                Some(Ok(other)) => {
                    tracing::debug!(connection_id = %self.id, ?other, "ignoring raw frame");
                    continue;
                }
                Some(Err(err)) => return Err(InterceptorError::transport(err)),
            }
        }
    }

    async fn write(&self, kind: MessageType, data: &[u8]) -> Result<(), InterceptorError> {
        let message = match kind {
            MessageType::Text => {
                let text = String::from_utf8(data.to_vec())
                    .map_err(|_| InterceptorError::Validation("text frame is not utf-8".into()))?;
                Message::Text(text.into())
            }
            MessageType::Binary => Message::Binary(data.to_vec().into()),
        };

        self.sink
            .lock()
            .await
            .send(message)
            .await
            .map_err(InterceptorError::transport)
    }
}
