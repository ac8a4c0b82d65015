//! Factory wiring the traffic logger into a registry.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use interceptor::config::LoggingOptions;
use interceptor::{Factory, Interceptor, InterceptorError};

use crate::log::LogInterceptor;
use crate::sink::{FileSinkFactory, SinkFactory};

/// Builds a [`LogInterceptor`] per chain.
///
/// By default records go to one JSON-lines file per connection under the
/// configured directory; a custom [`SinkFactory`] can replace that.
pub struct LogFactory {
    sink_factory: Arc<dyn SinkFactory>,
}

impl LogFactory {
    pub fn new(options: LoggingOptions) -> Self {
        Self {
            sink_factory: Arc::new(FileSinkFactory::new(options.directory)),
        }
    }

    pub fn with_sink_factory(sink_factory: Arc<dyn SinkFactory>) -> Self {
        Self { sink_factory }
    }
}

impl Factory for LogFactory {
    fn new_interceptor(
        &self,
        token: CancellationToken,
        _id: &str,
    ) -> Result<Arc<dyn Interceptor>, InterceptorError> {
        Ok(Arc::new(LogInterceptor::new(
            token,
            self.sink_factory.clone(),
        )))
    }
}
