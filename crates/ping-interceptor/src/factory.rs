//! Factory wiring the liveness interceptor into a registry.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use interceptor::config::PingOptions;
use interceptor::{Factory, Interceptor, InterceptorError};

use crate::ping::PingInterceptor;

/// Builds a [`PingInterceptor`] per chain from the configured options.
pub struct PingFactory {
    options: PingOptions,
}

impl PingFactory {
    pub fn new(options: PingOptions) -> Self {
        Self { options }
    }
}

impl Factory for PingFactory {
    fn new_interceptor(
        &self,
        token: CancellationToken,
        id: &str,
    ) -> Result<Arc<dyn Interceptor>, InterceptorError> {
        Ok(Arc::new(PingInterceptor::new(
            token,
            id,
            self.options.interval(),
            self.options.max_history,
            self.options.emit,
        )))
    }
}
