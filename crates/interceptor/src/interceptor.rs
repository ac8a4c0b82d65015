//! The interceptor contract, the no-op base, and the factory registry.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::chain::Chain;
use crate::connection::SharedConnection;
use crate::error::InterceptorError;
use crate::pipeline::{SharedReader, SharedWriter};

/// A middleware node in the connection pipeline.
///
/// Interceptors can bind to a connection (to set up per-connection state and
/// background tasks), wrap its writer (outgoing messages) and its reader
/// (incoming messages), and tear the state down again. This lets concerns
/// like liveness, logging, encryption, or multicast layer over a connection
/// without the core transport code knowing about any of them.
///
/// The default method bodies form the no-op base: implementations override
/// only the operations they care about.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Called once when a new connection is admitted.
    ///
    /// `writer` and `reader` are the fully composed outer stack as seen from
    /// this interceptor's position, so unsolicited messages an interceptor
    /// emits (pings, key-exchange traffic) traverse the same pipeline as
    /// ordinary outbound traffic. Fails if the connection is already bound.
    async fn bind(
        &self,
        _conn: SharedConnection,
        _writer: SharedWriter,
        _reader: SharedReader,
    ) -> Result<(), InterceptorError> {
        Ok(())
    }

    /// Wrap the writer used for outgoing messages. Side-effect free until the
    /// returned writer is invoked.
    fn intercept_writer(&self, writer: SharedWriter) -> SharedWriter {
        writer
    }

    /// Wrap the reader used for incoming messages.
    fn intercept_reader(&self, reader: SharedReader) -> SharedReader {
        reader
    }

    /// Called when a connection is closed or removed; releases the
    /// connection's state. Best-effort and safe to call for connections that
    /// were never bound.
    async fn unbind(&self, _conn: &SharedConnection) {}

    /// Shut the interceptor itself down, dropping all per-connection state.
    /// Safe to call multiple times.
    async fn close(&self) -> Result<(), InterceptorError> {
        Ok(())
    }
}

/// Interceptor that intercepts nothing; used when no factories are
/// registered.
pub struct NoOpInterceptor;

impl Interceptor for NoOpInterceptor {}

/// Constructs a single interceptor for a given connection context.
///
/// `token` is the parent cancellation token the interceptor derives all its
/// per-connection contexts from; `id` identifies the endpoint the interceptor
/// serves (it becomes the sender id of unsolicited messages).
pub trait Factory: Send + Sync {
    fn new_interceptor(
        &self,
        token: CancellationToken,
        id: &str,
    ) -> Result<Arc<dyn Interceptor>, InterceptorError>;
}

/// Ordered collection of interceptor factories.
///
/// Factories are invoked in registration order, which becomes the chain
/// order: the first registered interceptor sits innermost on the write path
/// (closest to the transport) and sees inbound messages first.
#[derive(Default)]
pub struct Registry {
    factories: Vec<Box<dyn Factory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Box<dyn Factory>) {
        self.factories.push(factory);
    }

    /// Build a chain by invoking every registered factory in order.
    ///
    /// An empty registry yields a no-op interceptor. Any factory failure
    /// aborts the build; no partial chains are returned.
    pub fn build(
        &self,
        token: CancellationToken,
        id: &str,
    ) -> Result<Arc<dyn Interceptor>, InterceptorError> {
        if self.factories.is_empty() {
            return Ok(Arc::new(NoOpInterceptor));
        }

        let mut interceptors = Vec::with_capacity(self.factories.len());
        for factory in &self.factories {
            interceptors.push(factory.new_interceptor(token.clone(), id)?);
        }

        Ok(Arc::new(Chain::new(interceptors)))
    }
}
