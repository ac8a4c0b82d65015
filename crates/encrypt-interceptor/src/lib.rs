//! End-to-end encryption for intercepted connections.
//!
//! The interceptor layers confidentiality and integrity over the transport:
//! an in-band handshake (X25519 key agreement, the server side authenticated
//! by a long-lived Ed25519 signature, directional keys via HKDF-SHA256)
//! establishes a per-connection AES-256-GCM session, after which every
//! envelope is transparently sealed on the way out and opened on the way in.
//! The session id doubles as AEAD associated data and is rotated by the
//! session owner to bound how much traffic one id covers.
//!
//! Cryptographic failures drop the offending message and surface an error;
//! they never tear the connection down, so a peer can retry or renegotiate.

pub mod cipher;
pub mod encrypt;
pub mod error;
pub mod factory;
pub mod handshake;
pub mod messages;

pub use cipher::Aes256Session;
pub use encrypt::{EncryptInterceptor, HandshakeKeys, ROTATION_INTERVAL};
pub use error::CryptoError;
pub use factory::EncryptFactory;
pub use handshake::{HANDSHAKE_TIMEOUT, SERVER_PRIV_KEY_ENV, SERVER_PUB_KEY_ENV};
pub use messages::{
    EncryptedMessage, Init, InitDone, InitResponse, UpdateSession, PROTOCOL_DONE, PROTOCOL_INIT,
    PROTOCOL_MESSAGE, PROTOCOL_RESPONSE, PROTOCOL_UPDATE_SESSION,
};
