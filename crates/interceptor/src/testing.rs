//! In-process transport for exercising interceptor stacks in tests.
//!
//! [`MemoryConnection::pair`] returns two connections glued together by
//! channels: frames written on one side are read on the other. Tests can
//! drive both ends of a chain (or two chains, one per side) without sockets.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::connection::{Connection, ConnectionId, MessageType};
use crate::error::InterceptorError;

const CHANNEL_BUFFER: usize = 64;

type Frame = (MessageType, Vec<u8>);

/// One end of an in-memory duplex connection.
pub struct MemoryConnection {
    id: ConnectionId,
    tx: mpsc::Sender<Frame>,
    rx: Mutex<mpsc::Receiver<Frame>>,
}

impl MemoryConnection {
    /// Create two connected ends; frames written to one are read from the
    /// other.
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let (left_tx, left_rx) = mpsc::channel(CHANNEL_BUFFER);
        let (right_tx, right_rx) = mpsc::channel(CHANNEL_BUFFER);

        let left = Arc::new(Self {
            id: ConnectionId::new(),
            tx: left_tx,
            rx: Mutex::new(right_rx),
        });
        let right = Arc::new(Self {
            id: ConnectionId::new(),
            tx: right_tx,
            rx: Mutex::new(left_rx),
        });

        (left, right)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn read(&self) -> Result<(MessageType, Vec<u8>), InterceptorError> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(InterceptorError::ConnectionClosed)
    }

    async fn write(&self, kind: MessageType, data: &[u8]) -> Result<(), InterceptorError> {
        self.tx
            .send((kind, data.to_vec()))
            .await
            .map_err(|_| InterceptorError::ConnectionClosed)
    }
}
