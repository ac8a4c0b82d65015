//! Composable middleware pipeline for WebSocket message transports.
//!
//! This crate is the framework core: it defines the message envelope and
//! protocol registry, the connection capability the transport must provide,
//! the typed writer/reader pipeline, the [`Interceptor`] contract with its
//! chain and factory registry, and the shared error type. Concrete
//! interceptors (liveness pings, traffic logging, encryption, rooms) live in
//! sibling crates and plug in through [`Registry`].
//!
//! On the write path a user message traverses the chain from the outermost
//! wrapper down to the transport; on the read path an inbound frame is
//! decoded once and then climbs the chain, each interceptor inspecting,
//! transforming, absorbing, or injecting messages as it goes.

pub mod chain;
pub mod config;
pub mod connection;
pub mod error;
pub mod interceptor;
pub mod message;
pub mod pipeline;
pub mod testing;

pub use chain::Chain;
pub use connection::{Connection, ConnectionId, MessageType, SharedConnection};
pub use error::{aggregate, InterceptorError};
pub use interceptor::{Factory, Interceptor, NoOpInterceptor, Registry};
pub use message::{Envelope, Header, Protocol, ProtocolRegistry, PROTOCOL_NONE};
pub use pipeline::{
    FrameReader, FrameWriter, Reader, SharedReader, SharedWriter, Writer, WriterReader,
};
