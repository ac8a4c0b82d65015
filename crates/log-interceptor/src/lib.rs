//! Traffic logging for intercepted connections.
//!
//! Every envelope crossing a bound connection — in either direction — is
//! copied into one or more [`LogSink`]s as a JSON-lines [`TrafficRecord`].
//! The file sink hands records to a bounded queue drained in bursts by a
//! writer task, so logging never stalls the message path.

pub mod factory;
pub mod log;
pub mod record;
pub mod sink;

pub use factory::LogFactory;
pub use log::LogInterceptor;
pub use record::{Direction, TrafficRecord};
pub use sink::{
    FileSink, FileSinkFactory, LogSink, MemorySink, SharedSink, SinkError, SinkFactory,
};
