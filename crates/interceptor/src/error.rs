use crate::message::Protocol;

/// Errors produced by the interceptor pipeline.
///
/// The variants map onto the failure classes the pipeline distinguishes:
/// validation of individual envelopes, routing by protocol tag, transport
/// failures from the underlying connection, cryptographic failures, and
/// state errors (binding, membership). Fan-out style operations collect the
/// failures of their individual targets into [`InterceptorError::Aggregate`]
/// so that one failing target never hides the others.
#[derive(Debug, thiserror::Error)]
pub enum InterceptorError {
    /// A malformed envelope or payload: empty required fields, wrong shape.
    #[error("invalid message: {0}")]
    Validation(String),

    /// An envelope arrived with a protocol tag no decoder is registered for.
    #[error("no decoder registered for protocol '{0}'")]
    UnknownProtocol(Protocol),

    /// Failure in the underlying frame transport.
    #[error("transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The underlying connection is closed; reads and writes can no longer
    /// be serviced.
    #[error("connection closed")]
    ConnectionClosed,

    /// Signature mismatch, key-derivation failure, or AEAD seal/open failure.
    #[error("cryptographic failure: {0}")]
    Crypto(String),

    /// The key-exchange initiator gave up waiting for the handshake to
    /// complete.
    #[error("timed out waiting for key exchange to complete")]
    HandshakeTimeout,

    /// A connection was bound into an interceptor that already tracks it.
    #[error("connection already bound")]
    AlreadyBound,

    /// An operation referenced a connection no interceptor state exists for.
    #[error("connection not bound")]
    NotBound,

    #[error("failed to encode or decode message: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Multiple independent failures, e.g. from closing every member of a
    /// chain or fanning a message out to several recipients.
    #[error("{}", join_all(.0))]
    Aggregate(Vec<InterceptorError>),
}

impl InterceptorError {
    /// Wrap an arbitrary transport-level error.
    pub fn transport(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Transport(Box::new(err))
    }
}

/// Collapse a list of errors into a single result.
///
/// An empty list is success, a single error is returned as-is, and more than
/// one error becomes [`InterceptorError::Aggregate`]. All errors are
/// surfaced; none are swallowed.
pub fn aggregate(errs: Vec<InterceptorError>) -> Result<(), InterceptorError> {
    match errs.len() {
        0 => Ok(()),
        1 => Err(errs.into_iter().next().expect("len checked")),
        _ => Err(InterceptorError::Aggregate(errs)),
    }
}

fn join_all(errs: &[InterceptorError]) -> String {
    errs.iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
