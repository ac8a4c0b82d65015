//! The encryption interceptor.
//!
//! Per connection, the interceptor walks a small state machine: fresh after
//! bind, handshake in flight once [`EncryptInterceptor::init`] has sent the
//! signed `Init`, and ready when both directional keys and the session id are
//! installed. From then on every outbound envelope (other than the clear-text
//! handshake family) is sealed into an `encrypt-message` and every inbound
//! `encrypt-message` is opened back into the envelope it carries. The session
//! owner rotates the session id on a timer to bound how much data a single
//! associated-data value covers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::{SigningKey, VerifyingKey};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use x25519_dalek::{PublicKey, StaticSecret};

use interceptor::config::Role;
use interceptor::{
    Connection, ConnectionId, Envelope, Interceptor, InterceptorError, MessageType,
    ProtocolRegistry, Reader, SharedConnection, SharedReader, SharedWriter, Writer,
};

use crate::cipher::Aes256Session;
use crate::error::CryptoError;
use crate::handshake::{self, HANDSHAKE_TIMEOUT};
use crate::messages::{
    self, is_handshake, EncryptPayload, EncryptedMessage, Init, InitDone, InitResponse,
    UpdateSession, PROTOCOL_MESSAGE,
};

/// How often the session owner rotates the session id.
pub const ROTATION_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Long-lived signing material; which half is present depends on the role.
pub struct HandshakeKeys {
    /// Signs `Init` messages; required by the initiator (server role).
    pub signing: Option<SigningKey>,
    /// Verifies `Init` signatures; required by the responder (client role).
    pub verifying: Option<VerifyingKey>,
}

struct EncryptState {
    /// Peer identity; `"unknown"` until the handshake names it.
    peer_id: String,
    /// Our ephemeral secret, held between sending `Init` and receiving the
    /// response. Consumed by the Diffie-Hellman step.
    secret: Option<StaticSecret>,
    salt: [u8; 16],
    session: Arc<Aes256Session>,
    /// One-shot completion signal for `init`; late or duplicate completions
    /// collapse into a single wake.
    init_done: Arc<Notify>,
    /// Full-stack writer for handshake and rotation traffic.
    writer: SharedWriter,
    token: CancellationToken,
}

struct Inner {
    id: String,
    role: Role,
    rotation_interval: Duration,
    keys: HandshakeKeys,
    registry: ProtocolRegistry<EncryptPayload>,
    states: RwLock<HashMap<ConnectionId, EncryptState>>,
    token: CancellationToken,
}

/// End-to-end encryption over an intercepted connection.
pub struct EncryptInterceptor {
    inner: Arc<Inner>,
}

impl EncryptInterceptor {
    pub fn new(
        token: CancellationToken,
        id: impl Into<String>,
        role: Role,
        keys: HandshakeKeys,
    ) -> Self {
        Self::with_rotation_interval(token, id, role, keys, ROTATION_INTERVAL)
    }

    pub fn with_rotation_interval(
        token: CancellationToken,
        id: impl Into<String>,
        role: Role,
        keys: HandshakeKeys,
        rotation_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                role,
                rotation_interval,
                keys,
                registry: messages::registry(),
                states: RwLock::new(HashMap::new()),
                token,
            }),
        }
    }

    /// Start the key exchange on a bound connection and wait for it to
    /// complete.
    ///
    /// Generates the ephemeral keypair, salt and session id, signs the
    /// public half, sends `Init` through the connection's full stack, and
    /// blocks until the peer's response round-trips or [`HANDSHAKE_TIMEOUT`]
    /// elapses. On timeout the connection stays bound but cannot carry
    /// encrypted traffic; the caller decides whether to close it.
    pub async fn init(&self, conn: &SharedConnection) -> Result<(), InterceptorError> {
        let signing = self
            .inner
            .keys
            .signing
            .as_ref()
            .ok_or(CryptoError::MissingKey(handshake::SERVER_PRIV_KEY_ENV))?;

        let (writer, notify, init) = {
            let mut states = self.inner.states.write().expect("states lock poisoned");
            let state = states.get_mut(&conn.id()).ok_or(InterceptorError::NotBound)?;

            let (secret, public) = handshake::generate_keypair();
            let salt = handshake::generate_salt();
            let session_id = handshake::generate_session_id();
            let signature = handshake::sign(signing, &public, &salt);

            state.secret = Some(secret);
            state.salt = salt;
            state.session.set_session_id(session_id);

            let init = Init::new(&self.inner.id, &state.peer_id, public, signature, session_id, salt);
            (state.writer.clone(), state.init_done.clone(), init)
        };

        writer
            .write(conn, MessageType::Text, &Envelope::encode(&init)?)
            .await?;

        tokio::time::timeout(HANDSHAKE_TIMEOUT, notify.notified())
            .await
            .map_err(|_| InterceptorError::HandshakeTimeout)
    }

    /// Whether the connection's session is ready for encrypted traffic.
    pub fn ready(&self, conn: ConnectionId) -> bool {
        let states = self.inner.states.read().expect("states lock poisoned");
        states
            .get(&conn)
            .map(|state| state.session.ready())
            .unwrap_or(false)
    }
}

#[async_trait]
impl Interceptor for EncryptInterceptor {
    async fn bind(
        &self,
        conn: SharedConnection,
        writer: SharedWriter,
        _reader: SharedReader,
    ) -> Result<(), InterceptorError> {
        let token = {
            let mut states = self.inner.states.write().expect("states lock poisoned");
            if states.contains_key(&conn.id()) {
                return Err(InterceptorError::AlreadyBound);
            }

            let token = self.inner.token.child_token();
            states.insert(
                conn.id(),
                EncryptState {
                    peer_id: "unknown".to_string(),
                    secret: None,
                    salt: [0; 16],
                    session: Arc::new(Aes256Session::new()),
                    init_done: Arc::new(Notify::new()),
                    writer,
                    token: token.clone(),
                },
            );
            token
        };

        // Only the session owner rotates session ids.
        if self.inner.role == Role::Server {
            tokio::spawn(rotation_loop(self.inner.clone(), conn, token));
        }

        Ok(())
    }

    fn intercept_writer(&self, writer: SharedWriter) -> SharedWriter {
        Arc::new(EncryptWriter {
            inner: self.inner.clone(),
            next: writer,
        })
    }

    fn intercept_reader(&self, reader: SharedReader) -> SharedReader {
        Arc::new(EncryptReader {
            inner: self.inner.clone(),
            next: reader,
        })
    }

    async fn unbind(&self, conn: &SharedConnection) {
        let mut states = self.inner.states.write().expect("states lock poisoned");
        match states.remove(&conn.id()) {
            Some(state) => {
                state.token.cancel();
                state.session.clear();
            }
            None => tracing::debug!(connection_id = %conn.id(), "unbind for unknown connection"),
        }
    }

    async fn close(&self) -> Result<(), InterceptorError> {
        self.inner.token.cancel();
        let mut states = self.inner.states.write().expect("states lock poisoned");
        for state in states.values() {
            state.token.cancel();
            state.session.clear();
        }
        states.clear();
        Ok(())
    }
}

/// Session-id rotation loop; one per connection on the owning side.
async fn rotation_loop(inner: Arc<Inner>, conn: SharedConnection, token: CancellationToken) {
    let start = tokio::time::Instant::now() + inner.rotation_interval;
    let mut ticker = tokio::time::interval_at(start, inner.rotation_interval);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {
                let (writer, session, peer_id) = {
                    let states = inner.states.read().expect("states lock poisoned");
                    match states.get(&conn.id()) {
                        Some(state) => (
                            state.writer.clone(),
                            state.session.clone(),
                            state.peer_id.clone(),
                        ),
                        None => return,
                    }
                };

                if !session.ready() {
                    continue;
                }

                let new_id = handshake::generate_session_id();
                let update = UpdateSession::new(&inner.id, &peer_id, new_id, 0);
                let envelope = match Envelope::encode(&update) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        tracing::error!(%err, "failed to encode session update");
                        continue;
                    }
                };

                // The update itself travels under the old session id; only
                // switch after it is on the wire.
                match writer.write(&conn, MessageType::Text, &envelope).await {
                    Ok(()) => session.set_session_id(new_id),
                    Err(err) => {
                        tracing::warn!(connection_id = %conn.id(), %err, "failed to send session update");
                    }
                }
            }
        }
    }
}

/// Seals outbound envelopes once the session is ready.
struct EncryptWriter {
    inner: Arc<Inner>,
    next: SharedWriter,
}

#[async_trait]
impl interceptor::Writer for EncryptWriter {
    async fn write(
        &self,
        conn: &SharedConnection,
        kind: MessageType,
        envelope: &Envelope,
    ) -> Result<(), InterceptorError> {
        let tag = envelope.protocol().as_str();
        if is_handshake(tag) || tag == PROTOCOL_MESSAGE {
            return self.next.write(conn, kind, envelope).await;
        }

        let session = {
            let states = self.inner.states.read().expect("states lock poisoned");
            states.get(&conn.id()).map(|state| state.session.clone())
        };

        let session = match session {
            Some(session) if session.ready() => session,
            // Not bound or handshake still in flight: pass through in the
            // clear, exactly as the handshake traffic itself is carried.
            _ => return self.next.write(conn, kind, envelope).await,
        };

        let plaintext = envelope.to_bytes()?;
        let (nonce, ciphertext) = session.seal(&plaintext).map_err(InterceptorError::from)?;

        let sealed = EncryptedMessage::new(
            envelope.header.sender_id.clone(),
            envelope.header.receiver_id.clone(),
            nonce,
            ciphertext,
        );
        self.next
            .write(conn, kind, &Envelope::encode(&sealed)?)
            .await
    }
}

/// Opens inbound `encrypt-message` envelopes and runs the handshake state
/// machine on its own clear-text tags.
struct EncryptReader {
    inner: Arc<Inner>,
    next: SharedReader,
}

#[async_trait]
impl interceptor::Reader for EncryptReader {
    async fn read(
        &self,
        conn: &SharedConnection,
    ) -> Result<(MessageType, Envelope), InterceptorError> {
        let (kind, envelope) = self.next.read(conn).await?;

        match self.inner.registry.decode(&envelope) {
            Some(Ok(EncryptPayload::Message(sealed))) => {
                sealed.validate()?;
                let opened = self.open(conn, &sealed)?;
                Ok((kind, opened))
            }
            Some(Ok(payload)) => {
                self.process(conn, payload).await?;
                Ok((kind, envelope))
            }
            Some(Err(err)) => {
                tracing::warn!(connection_id = %conn.id(), %err, "undecodable key-exchange message");
                Ok((kind, envelope))
            }
            None => Ok((kind, envelope)),
        }
    }
}

impl EncryptReader {
    fn open(
        &self,
        conn: &SharedConnection,
        sealed: &EncryptedMessage,
    ) -> Result<Envelope, InterceptorError> {
        let session = {
            let states = self.inner.states.read().expect("states lock poisoned");
            states
                .get(&conn.id())
                .map(|state| state.session.clone())
                .ok_or(InterceptorError::NotBound)?
        };

        let plaintext = session
            .open(&sealed.nonce, &sealed.payload)
            .map_err(InterceptorError::from)?;
        Envelope::from_bytes(&plaintext)
    }

    async fn process(
        &self,
        conn: &SharedConnection,
        payload: EncryptPayload,
    ) -> Result<(), InterceptorError> {
        match payload {
            EncryptPayload::Init(init) => self.process_init(conn, init).await,
            EncryptPayload::Response(response) => self.process_response(conn, response).await,
            EncryptPayload::Done(_) => self.process_done(conn),
            EncryptPayload::UpdateSession(update) => self.process_update(conn, update),
            EncryptPayload::Message(_) => unreachable!("handled by the read path"),
        }
    }

    /// Responder half of the exchange: verify the server's signature, derive
    /// the directional keys, and answer with our public key.
    async fn process_init(
        &self,
        conn: &SharedConnection,
        init: Init,
    ) -> Result<(), InterceptorError> {
        init.validate()?;

        let verifying = self
            .inner
            .keys
            .verifying
            .as_ref()
            .ok_or(CryptoError::MissingKey(handshake::SERVER_PUB_KEY_ENV))?;
        handshake::verify(verifying, &init.public_key, &init.salt, &init.signature)
            .map_err(InterceptorError::from)?;

        let (writer, response) = {
            let mut states = self.inner.states.write().expect("states lock poisoned");
            let state = states.get_mut(&conn.id()).ok_or(InterceptorError::NotBound)?;

            let (secret, public) = handshake::generate_keypair();
            state.peer_id = init.header.sender_id.clone();
            state.salt = init.salt;

            let shared = secret.diffie_hellman(&PublicKey::from(init.public_key));
            let (k1, k2) = handshake::derive_keys(shared.as_bytes(), &state.salt, &self.inner.id)
                .map_err(InterceptorError::from)?;

            state.session.set_keys(k1, k2);
            state.session.set_session_id(init.session_id);

            let response = InitResponse::new(&self.inner.id, &state.peer_id, public);
            (state.writer.clone(), response)
        };

        writer
            .write(conn, MessageType::Text, &Envelope::encode(&response)?)
            .await
    }

    /// Initiator half: finish the Diffie-Hellman with the responder's public
    /// key (key assignment reversed), wake the `init` waiter, and
    /// acknowledge.
    async fn process_response(
        &self,
        conn: &SharedConnection,
        response: InitResponse,
    ) -> Result<(), InterceptorError> {
        let (writer, notify, done) = {
            let mut states = self.inner.states.write().expect("states lock poisoned");
            let state = states.get_mut(&conn.id()).ok_or(InterceptorError::NotBound)?;

            state.peer_id = response.header.sender_id.clone();

            let secret = state
                .secret
                .take()
                .ok_or(CryptoError::NoPendingHandshake)?;
            let shared = secret.diffie_hellman(&PublicKey::from(response.public_key));
            let (k1, k2) = handshake::derive_keys(shared.as_bytes(), &state.salt, &self.inner.id)
                .map_err(InterceptorError::from)?;

            state.session.set_keys(k2, k1);

            let done = InitDone::new(&self.inner.id, &state.peer_id);
            (state.writer.clone(), state.init_done.clone(), done)
        };

        notify.notify_one();

        writer
            .write(conn, MessageType::Text, &Envelope::encode(&done)?)
            .await
    }

    fn process_done(&self, conn: &SharedConnection) -> Result<(), InterceptorError> {
        let states = self.inner.states.read().expect("states lock poisoned");
        let state = states.get(&conn.id()).ok_or(InterceptorError::NotBound)?;
        state.init_done.notify_one();
        Ok(())
    }

    /// Applies a rotated session id; only the non-owning side accepts one.
    fn process_update(
        &self,
        conn: &SharedConnection,
        update: UpdateSession,
    ) -> Result<(), InterceptorError> {
        if self.inner.role == Role::Server {
            return Err(InterceptorError::Validation(
                "session update sent to the session owner".into(),
            ));
        }

        let states = self.inner.states.read().expect("states lock poisoned");
        let state = states.get(&conn.id()).ok_or(InterceptorError::NotBound)?;
        state.session.set_session_id(update.session_id);
        Ok(())
    }
}
