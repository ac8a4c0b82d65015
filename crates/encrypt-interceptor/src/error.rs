use interceptor::InterceptorError;

/// Failures inside the key exchange and AEAD machinery.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("environment variable {0} is not set")]
    MissingKey(&'static str),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("signature verification failed")]
    Signature,

    #[error("key derivation failed")]
    KeyDerivation,

    #[error("failed to encrypt payload")]
    Seal,

    #[error("failed to decrypt payload")]
    Open,

    #[error("encryption session is not ready")]
    NotReady,

    #[error("no handshake in progress for this connection")]
    NoPendingHandshake,
}

impl From<CryptoError> for InterceptorError {
    fn from(err: CryptoError) -> Self {
        InterceptorError::Crypto(err.to_string())
    }
}
