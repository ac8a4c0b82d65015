//! Typed send/receive capabilities layered over a [`Connection`].
//!
//! A [`Writer`] turns an [`Envelope`] into a frame on the way out and a
//! [`Reader`] turns a frame back into an [`Envelope`] on the way in.
//! Interceptors wrap these capabilities; [`FrameWriter`] and [`FrameReader`]
//! are the base of every stack, doing nothing but the JSON codec step at the
//! transport boundary.

use std::sync::Arc;

use async_trait::async_trait;

use crate::connection::{Connection, MessageType, SharedConnection};
use crate::error::InterceptorError;
use crate::message::Envelope;

/// Typed writer for framework messages on a connection.
#[async_trait]
pub trait Writer: Send + Sync {
    async fn write(
        &self,
        conn: &SharedConnection,
        kind: MessageType,
        envelope: &Envelope,
    ) -> Result<(), InterceptorError>;
}

/// Typed reader for framework messages on a connection.
#[async_trait]
pub trait Reader: Send + Sync {
    async fn read(
        &self,
        conn: &SharedConnection,
    ) -> Result<(MessageType, Envelope), InterceptorError>;
}

pub type SharedWriter = Arc<dyn Writer>;
pub type SharedReader = Arc<dyn Reader>;

/// The fully composed writer/reader pair handed to an interceptor at bind
/// time so it can emit unsolicited traffic through the same stack ordinary
/// outbound messages traverse.
#[derive(Clone)]
pub struct WriterReader {
    pub writer: SharedWriter,
    pub reader: SharedReader,
}

/// Base writer: marshals the envelope and hands the bytes to the transport.
pub struct FrameWriter;

#[async_trait]
impl Writer for FrameWriter {
    async fn write(
        &self,
        conn: &SharedConnection,
        kind: MessageType,
        envelope: &Envelope,
    ) -> Result<(), InterceptorError> {
        let data = envelope.to_bytes()?;
        conn.write(kind, &data).await
    }
}

/// Base reader: reads one frame from the transport and decodes the envelope.
pub struct FrameReader;

#[async_trait]
impl Reader for FrameReader {
    async fn read(
        &self,
        conn: &SharedConnection,
    ) -> Result<(MessageType, Envelope), InterceptorError> {
        let (kind, data) = conn.read().await?;
        let envelope = Envelope::from_bytes(&data)?;
        Ok((kind, envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Header;
    use crate::testing::MemoryConnection;

    #[tokio::test]
    async fn frame_codec_round_trips_over_connection() {
        let (left, right) = MemoryConnection::pair();
        let left: SharedConnection = left;
        let right: SharedConnection = right;

        let envelope = Envelope::new(
            Header::new("a", "b", "test"),
            &serde_json::json!({"n": 1}),
        )
        .unwrap();

        FrameWriter
            .write(&left, MessageType::Text, &envelope)
            .await
            .unwrap();

        let (kind, received) = FrameReader.read(&right).await.unwrap();
        assert_eq!(kind, MessageType::Text);
        assert_eq!(received, envelope);
    }
}
