//! Factory wiring the encryption interceptor into a registry.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use interceptor::config::{EncryptionOptions, Role};
use interceptor::{Factory, Interceptor, InterceptorError};

use crate::encrypt::{EncryptInterceptor, HandshakeKeys};
use crate::handshake;

/// Builds an [`EncryptInterceptor`] per chain.
///
/// The long-lived signing material comes from the environment: the server
/// role needs `SERVER_ENCRYPT_PRIV_KEY`, the client role needs
/// `SERVER_ENCRYPT_PUB_KEY`. A missing or malformed key fails the build; no
/// chain is produced that silently cannot complete a handshake.
pub struct EncryptFactory {
    options: EncryptionOptions,
}

impl EncryptFactory {
    pub fn new(options: EncryptionOptions) -> Self {
        Self { options }
    }
}

impl Factory for EncryptFactory {
    fn new_interceptor(
        &self,
        token: CancellationToken,
        id: &str,
    ) -> Result<Arc<dyn Interceptor>, InterceptorError> {
        if self.options.mode != "aes256" {
            return Err(InterceptorError::Validation(format!(
                "unsupported encryption mode '{}'",
                self.options.mode
            )));
        }

        let keys = match self.options.role {
            Role::Server => HandshakeKeys {
                signing: Some(handshake::signing_key_from_env()?),
                verifying: None,
            },
            Role::Client => HandshakeKeys {
                signing: None,
                verifying: Some(handshake::verifying_key_from_env()?),
            },
        };

        Ok(Arc::new(EncryptInterceptor::new(
            token,
            id,
            self.options.role,
            keys,
        )))
    }
}
