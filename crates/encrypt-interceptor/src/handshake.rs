//! Key generation, signing, and derivation for the in-band key exchange.
//!
//! The server proves its identity with a long-lived Ed25519 keypair
//! distributed out of band through the environment; forward secrecy comes
//! from a fresh X25519 keypair per connection. Both directions get distinct
//! AES-256 keys derived with HKDF-SHA256 from the shared secret.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::cipher::SESSION_ID_LEN;
use crate::error::CryptoError;

/// Environment variable holding the base64 Ed25519 public key clients verify
/// the handshake against.
pub const SERVER_PUB_KEY_ENV: &str = "SERVER_ENCRYPT_PUB_KEY";
/// Environment variable holding the base64 Ed25519 private key the server
/// signs the handshake with.
pub const SERVER_PRIV_KEY_ENV: &str = "SERVER_ENCRYPT_PRIV_KEY";

/// How long the initiator waits for the handshake to complete.
pub const HANDSHAKE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

fn key_bytes_from_env(name: &'static str) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let encoded = std::env::var(name).map_err(|_| CryptoError::MissingKey(name))?;
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CryptoError::InvalidKey(format!("{name}: {e}")))?;
    let bytes: [u8; 32] = decoded
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("{name}: expected 32 bytes")))?;
    Ok(Zeroizing::new(bytes))
}

/// Load the server's signing key from the environment.
pub fn signing_key_from_env() -> Result<SigningKey, CryptoError> {
    let bytes = key_bytes_from_env(SERVER_PRIV_KEY_ENV)?;
    Ok(SigningKey::from_bytes(&bytes))
}

/// Load the server's public verification key from the environment.
pub fn verifying_key_from_env() -> Result<VerifyingKey, CryptoError> {
    let bytes = key_bytes_from_env(SERVER_PUB_KEY_ENV)?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| CryptoError::InvalidKey(format!("{SERVER_PUB_KEY_ENV}: {e}")))
}

/// Fresh ephemeral X25519 keypair for one connection.
pub fn generate_keypair() -> (StaticSecret, [u8; 32]) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret).to_bytes();
    (secret, public)
}

pub fn generate_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    salt
}

pub fn generate_session_id() -> [u8; SESSION_ID_LEN] {
    let mut id = [0u8; SESSION_ID_LEN];
    OsRng.fill_bytes(&mut id);
    id
}

/// Sign `public_key ‖ salt` with the server's long-lived key.
pub fn sign(key: &SigningKey, public_key: &[u8; 32], salt: &[u8; 16]) -> [u8; 64] {
    let mut message = [0u8; 48];
    message[..32].copy_from_slice(public_key);
    message[32..].copy_from_slice(salt);
    key.sign(&message).to_bytes()
}

/// Verify the handshake signature; any mismatch is [`CryptoError::Signature`].
pub fn verify(
    key: &VerifyingKey,
    public_key: &[u8; 32],
    salt: &[u8; 16],
    signature: &[u8; 64],
) -> Result<(), CryptoError> {
    let mut message = [0u8; 48];
    message[..32].copy_from_slice(public_key);
    message[32..].copy_from_slice(salt);
    key.verify(&message, &Signature::from_bytes(signature))
        .map_err(|_| CryptoError::Signature)
}

/// Derive the two directional keys from the shared secret.
///
/// HKDF-SHA256 with the handshake salt and the interceptor id as context
/// info, expanded to 64 bytes and split `(k1, k2)`. The responder encrypts
/// with `k1` and decrypts with `k2`; the initiator reverses the assignment so
/// each side's encrypt key is the other's decrypt key.
pub fn derive_keys(
    shared: &[u8],
    salt: &[u8; 16],
    info: &str,
) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), shared);
    let mut okm = Zeroizing::new([0u8; 64]);
    hk.expand(info.as_bytes(), &mut okm[..])
        .map_err(|_| CryptoError::KeyDerivation)?;

    let mut k1 = [0u8; 32];
    let mut k2 = [0u8; 32];
    k1.copy_from_slice(&okm[..32]);
    k2.copy_from_slice(&okm[32..]);
    Ok((k1, k2))
}
