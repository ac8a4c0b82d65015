//! The transport-facing connection capability.
//!
//! The framework never opens sockets itself; an accepted connection is handed
//! in from outside as an opaque capability that can read and write whole
//! frames. Connections are compared by identity, never by contents, so every
//! per-interceptor state map is keyed by [`ConnectionId`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::InterceptorError;

/// Identity of a connection, used as the key in per-interceptor state maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Frame kind on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Text,
    Binary,
}

/// Capability interface required from the transport: context-bounded reads
/// and writes of opaque frames.
///
/// The transport implementation must serialize concurrent writes; callers
/// above it may race (application thread, background pinger, rekeyer).
#[async_trait]
pub trait Connection: Send + Sync {
    /// Stable identity for this connection.
    fn id(&self) -> ConnectionId;

    /// Read the next frame.
    async fn read(&self) -> Result<(MessageType, Vec<u8>), InterceptorError>;

    /// Write one frame.
    async fn write(&self, kind: MessageType, data: &[u8]) -> Result<(), InterceptorError>;
}

/// Shared handle to a connection as passed through the pipeline.
pub type SharedConnection = Arc<dyn Connection>;
