//! Per-connection AEAD state.

use std::sync::RwLock;

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// AES-256-GCM nonce length.
pub const NONCE_LEN: usize = 12;
/// Session-id length; the id is the AEAD associated data.
pub const SESSION_ID_LEN: usize = 16;

struct SessionInner {
    enc_key: Option<Zeroizing<[u8; 32]>>,
    dec_key: Option<Zeroizing<[u8; 32]>>,
    session_id: Option<[u8; SESSION_ID_LEN]>,
}

/// Directional AES-256-GCM pair plus the session id bound into every seal
/// and open as associated data.
///
/// Seal and open run under a read lock so parallel connections (and the read
/// and write halves of one connection) encrypt concurrently; key and session
/// installation take the write lock.
pub struct Aes256Session {
    inner: RwLock<SessionInner>,
}

impl Aes256Session {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(SessionInner {
                enc_key: None,
                dec_key: None,
                session_id: None,
            }),
        }
    }

    /// Install both directional keys. The pair is always set together so a
    /// session is never half-keyed.
    pub fn set_keys(&self, enc_key: [u8; 32], dec_key: [u8; 32]) {
        let mut inner = self.inner.write().expect("session lock poisoned");
        inner.enc_key = Some(Zeroizing::new(enc_key));
        inner.dec_key = Some(Zeroizing::new(dec_key));
    }

    pub fn set_session_id(&self, session_id: [u8; SESSION_ID_LEN]) {
        let mut inner = self.inner.write().expect("session lock poisoned");
        inner.session_id = Some(session_id);
    }

    pub fn session_id(&self) -> Option<[u8; SESSION_ID_LEN]> {
        self.inner.read().expect("session lock poisoned").session_id
    }

    /// Ready means both directional keys and the session id are installed.
    pub fn ready(&self) -> bool {
        let inner = self.inner.read().expect("session lock poisoned");
        inner.enc_key.is_some() && inner.dec_key.is_some() && inner.session_id.is_some()
    }

    /// Seal `plaintext` under a fresh random nonce; returns `(nonce,
    /// ciphertext)`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let inner = self.inner.read().expect("session lock poisoned");
        let key = inner.enc_key.as_ref().ok_or(CryptoError::NotReady)?;
        let session_id = inner.session_id.ok_or(CryptoError::NotReady)?;

        let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| CryptoError::Seal)?;
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &session_id,
                },
            )
            .map_err(|_| CryptoError::Seal)?;

        Ok((nonce.to_vec(), ciphertext))
    }

    /// Open a sealed payload with the current session id as associated data.
    pub fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if nonce.len() != NONCE_LEN {
            return Err(CryptoError::Open);
        }

        let inner = self.inner.read().expect("session lock poisoned");
        let key = inner.dec_key.as_ref().ok_or(CryptoError::NotReady)?;
        let session_id = inner.session_id.ok_or(CryptoError::NotReady)?;

        let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| CryptoError::Open)?;
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &session_id,
                },
            )
            .map_err(|_| CryptoError::Open)
    }

    /// Drop all key material.
    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("session lock poisoned");
        inner.enc_key = None;
        inner.dec_key = None;
        inner.session_id = None;
    }
}

impl Default for Aes256Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A loopback pair: what one side seals the other opens.
    fn ready_pair() -> (Aes256Session, Aes256Session) {
        let left = Aes256Session::new();
        let right = Aes256Session::new();
        left.set_keys([1; 32], [2; 32]);
        right.set_keys([2; 32], [1; 32]);
        left.set_session_id([7; 16]);
        right.set_session_id([7; 16]);
        (left, right)
    }

    #[test]
    fn not_ready_until_keys_and_session_id() {
        let session = Aes256Session::new();
        assert!(!session.ready());
        session.set_keys([0; 32], [0; 32]);
        assert!(!session.ready());
        session.set_session_id([0; 16]);
        assert!(session.ready());
    }

    #[test]
    fn open_inverts_seal() {
        let (left, right) = ready_pair();
        let (nonce, ciphertext) = left.seal(b"hello world").unwrap();
        assert_eq!(nonce.len(), NONCE_LEN);
        assert_eq!(right.open(&nonce, &ciphertext).unwrap(), b"hello world");
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let (left, right) = ready_pair();
        let (nonce, mut ciphertext) = left.seal(b"payload").unwrap();
        ciphertext[0] ^= 0x01;
        assert!(matches!(
            right.open(&nonce, &ciphertext),
            Err(CryptoError::Open)
        ));
    }

    #[test]
    fn session_id_mismatch_fails_to_open() {
        let (left, right) = ready_pair();
        let (nonce, ciphertext) = left.seal(b"payload").unwrap();
        right.set_session_id([8; 16]);
        assert!(right.open(&nonce, &ciphertext).is_err());
    }

    #[test]
    fn seal_requires_ready_session() {
        let session = Aes256Session::new();
        assert!(matches!(session.seal(b"x"), Err(CryptoError::NotReady)));
    }

    #[test]
    fn wrong_nonce_length_rejected() {
        let (left, right) = ready_pair();
        let (_, ciphertext) = left.seal(b"payload").unwrap();
        assert!(right.open(&[0; 11], &ciphertext).is_err());
    }
}
