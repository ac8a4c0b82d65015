//! Factory wiring the room interceptor into a registry.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use interceptor::config::RoomOptions;
use interceptor::{Factory, Interceptor, InterceptorError};

use crate::rooms::RoomInterceptor;

/// Builds a [`RoomInterceptor`] per chain. Room policy (allow-lists, TTLs)
/// travels in the messages themselves, so the options carry no knobs today.
pub struct RoomFactory {
    _options: RoomOptions,
}

impl RoomFactory {
    pub fn new(options: RoomOptions) -> Self {
        Self { _options: options }
    }
}

impl Factory for RoomFactory {
    fn new_interceptor(
        &self,
        token: CancellationToken,
        _id: &str,
    ) -> Result<Arc<dyn Interceptor>, InterceptorError> {
        Ok(Arc::new(RoomInterceptor::new(token)))
    }
}
