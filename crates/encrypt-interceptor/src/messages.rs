//! Wire messages owned by the encryption interceptor.
//!
//! Handshake traffic (`encrypt-init`, `encrypt-response`, `encrypt-done`,
//! `encrypt-update-session`) travels in the clear; `encrypt-message` carries
//! the sealed form of every other envelope once the session is ready. All
//! binary fields are base64 on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use interceptor::message::{b64, b64_array};
use interceptor::{Envelope, Header, InterceptorError, ProtocolRegistry};

pub const PROTOCOL_MESSAGE: &str = "encrypt-message";
pub const PROTOCOL_INIT: &str = "encrypt-init";
pub const PROTOCOL_RESPONSE: &str = "encrypt-response";
pub const PROTOCOL_DONE: &str = "encrypt-done";
pub const PROTOCOL_UPDATE_SESSION: &str = "encrypt-update-session";

/// Whether the tag belongs to the clear-text handshake family.
pub fn is_handshake(tag: &str) -> bool {
    matches!(
        tag,
        PROTOCOL_INIT | PROTOCOL_RESPONSE | PROTOCOL_DONE | PROTOCOL_UPDATE_SESSION
    )
}

/// A sealed envelope. The payload is the AEAD ciphertext of a complete
/// serialized envelope, authenticated against the current session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    #[serde(flatten)]
    pub header: Header,
    #[serde(with = "b64")]
    pub payload: Vec<u8>,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl EncryptedMessage {
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        nonce: Vec<u8>,
        ciphertext: Vec<u8>,
    ) -> Self {
        Self {
            header: Header::new(sender_id, receiver_id, PROTOCOL_MESSAGE),
            payload: ciphertext,
            nonce,
            timestamp: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<(), InterceptorError> {
        if self.nonce.is_empty() {
            return Err(InterceptorError::Validation("empty nonce".into()));
        }
        self.header.validate()
    }
}

/// Opens the key exchange: the initiator's ephemeral public key, a signature
/// over `public_key ‖ salt` by the server's long-lived signing key, the
/// initial session id, and the HKDF salt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Init {
    #[serde(flatten)]
    pub header: Header,
    #[serde(with = "b64_array")]
    pub public_key: [u8; 32],
    #[serde(with = "b64_array")]
    pub signature: [u8; 64],
    #[serde(with = "b64_array")]
    pub session_id: [u8; 16],
    #[serde(with = "b64_array")]
    pub salt: [u8; 16],
}

impl Init {
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        public_key: [u8; 32],
        signature: [u8; 64],
        session_id: [u8; 16],
        salt: [u8; 16],
    ) -> Self {
        Self {
            header: Header::new(sender_id, receiver_id, PROTOCOL_INIT),
            public_key,
            signature,
            session_id,
            salt,
        }
    }

    pub fn validate(&self) -> Result<(), InterceptorError> {
        if self.signature.iter().all(|b| *b == 0) {
            return Err(InterceptorError::Validation("empty signature".into()));
        }
        self.header.validate()
    }
}

/// The responder's half of the exchange: its ephemeral public key.
///
/// Deliberately unsigned; client-to-server authentication is handled by a
/// separate layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitResponse {
    #[serde(flatten)]
    pub header: Header,
    #[serde(with = "b64_array")]
    pub public_key: [u8; 32],
}

impl InitResponse {
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        public_key: [u8; 32],
    ) -> Self {
        Self {
            header: Header::new(sender_id, receiver_id, PROTOCOL_RESPONSE),
            public_key,
        }
    }
}

/// Acknowledgement that both sides hold the derived keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitDone {
    #[serde(flatten)]
    pub header: Header,
}

impl InitDone {
    pub fn new(sender_id: impl Into<String>, receiver_id: impl Into<String>) -> Self {
        Self {
            header: Header::new(sender_id, receiver_id, PROTOCOL_DONE),
        }
    }
}

/// Rotates the session id used as AEAD associated data.
///
/// `update_at_seq` is advisory: receivers apply the new id immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSession {
    #[serde(flatten)]
    pub header: Header,
    #[serde(with = "b64_array")]
    pub session_id: [u8; 16],
    pub update_at_seq: u64,
}

impl UpdateSession {
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        session_id: [u8; 16],
        update_at_seq: u64,
    ) -> Self {
        Self {
            header: Header::new(sender_id, receiver_id, PROTOCOL_UPDATE_SESSION),
            session_id,
            update_at_seq,
        }
    }
}

/// The decoded payloads this interceptor dispatches on.
pub enum EncryptPayload {
    Message(EncryptedMessage),
    Init(Init),
    Response(InitResponse),
    Done(InitDone),
    UpdateSession(UpdateSession),
}

pub fn registry() -> ProtocolRegistry<EncryptPayload> {
    let mut registry = ProtocolRegistry::new();
    registry.register(PROTOCOL_MESSAGE, |envelope: &Envelope| {
        envelope.decode::<EncryptedMessage>().map(EncryptPayload::Message)
    });
    registry.register(PROTOCOL_INIT, |envelope: &Envelope| {
        envelope.decode::<Init>().map(EncryptPayload::Init)
    });
    registry.register(PROTOCOL_RESPONSE, |envelope: &Envelope| {
        envelope.decode::<InitResponse>().map(EncryptPayload::Response)
    });
    registry.register(PROTOCOL_DONE, |envelope: &Envelope| {
        envelope.decode::<InitDone>().map(EncryptPayload::Done)
    });
    registry.register(PROTOCOL_UPDATE_SESSION, |envelope: &Envelope| {
        envelope.decode::<UpdateSession>().map(EncryptPayload::UpdateSession)
    });
    registry
}
