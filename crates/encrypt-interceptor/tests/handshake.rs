//! Two-sided key-exchange and AEAD tests over an in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use encrypt_interceptor::{EncryptInterceptor, HandshakeKeys, PROTOCOL_UPDATE_SESSION};
use interceptor::config::Role;
use interceptor::testing::MemoryConnection;
use interceptor::{
    Connection, Envelope, FrameReader, FrameWriter, Header, Interceptor, InterceptorError,
    MessageType, Reader, SharedConnection, SharedReader, SharedWriter, Writer,
};
use tokio_util::sync::CancellationToken;

struct Side {
    interceptor: Arc<EncryptInterceptor>,
    conn: SharedConnection,
    writer: SharedWriter,
    reader: SharedReader,
}

fn keypair() -> (SigningKey, ed25519_dalek::VerifyingKey) {
    let signing = SigningKey::generate(&mut OsRng);
    let verifying = signing.verifying_key();
    (signing, verifying)
}

fn build_side(
    id: &str,
    role: Role,
    keys: HandshakeKeys,
    conn: Arc<MemoryConnection>,
    rotation: Duration,
) -> Side {
    let interceptor = Arc::new(EncryptInterceptor::with_rotation_interval(
        CancellationToken::new(),
        id,
        role,
        keys,
        rotation,
    ));
    let conn: SharedConnection = conn;
    let writer = interceptor.intercept_writer(Arc::new(FrameWriter));
    let reader = interceptor.intercept_reader(Arc::new(FrameReader));
    Side {
        interceptor,
        conn,
        writer,
        reader,
    }
}

/// A bound server/client pair with the given rotation interval on the
/// server.
async fn bound_pair(rotation: Duration) -> (Side, Side) {
    let (signing, verifying) = keypair();
    let (server_conn, client_conn) = MemoryConnection::pair();

    let server = build_side(
        "server",
        Role::Server,
        HandshakeKeys {
            signing: Some(signing),
            verifying: None,
        },
        server_conn,
        rotation,
    );
    let client = build_side(
        "client-1",
        Role::Client,
        HandshakeKeys {
            signing: None,
            verifying: Some(verifying),
        },
        client_conn,
        rotation,
    );

    server
        .interceptor
        .bind(
            server.conn.clone(),
            server.writer.clone(),
            server.reader.clone(),
        )
        .await
        .unwrap();
    client
        .interceptor
        .bind(
            client.conn.clone(),
            client.writer.clone(),
            client.reader.clone(),
        )
        .await
        .unwrap();

    (server, client)
}

/// Run the handshake to completion: the client pumps `Init` and `InitDone`,
/// the server pumps `InitResponse`.
async fn handshake(server: &Side, client: &Side) {
    let client_reader = client.reader.clone();
    let client_conn = client.conn.clone();
    let client_pump = tokio::spawn(async move {
        client_reader.read(&client_conn).await.unwrap();
        client_reader.read(&client_conn).await.unwrap();
    });

    let server_reader = server.reader.clone();
    let server_conn = server.conn.clone();
    let server_pump = tokio::spawn(async move {
        server_reader.read(&server_conn).await.unwrap();
    });

    server.interceptor.init(&server.conn).await.unwrap();
    client_pump.await.unwrap();
    server_pump.await.unwrap();
}

fn app_message() -> Envelope {
    Envelope::new(
        Header::new("server", "client-1", "app"),
        &serde_json::json!({"hello": "world"}),
    )
    .unwrap()
}

#[tokio::test]
async fn handshake_brings_both_sides_ready() {
    let (server, client) = bound_pair(Duration::from_secs(300)).await;
    assert!(!server.interceptor.ready(server.conn.id()));

    handshake(&server, &client).await;

    assert!(server.interceptor.ready(server.conn.id()));
    assert!(client.interceptor.ready(client.conn.id()));
}

#[tokio::test]
async fn ready_session_round_trips_a_payload() {
    let (server, client) = bound_pair(Duration::from_secs(300)).await;
    handshake(&server, &client).await;

    let message = app_message();
    server
        .writer
        .write(&server.conn, MessageType::Text, &message)
        .await
        .unwrap();

    // On the wire the frame is an encrypt-message, not the app envelope.
    let (_, raw) = client.conn.read().await.unwrap();
    let on_wire = Envelope::from_bytes(&raw).unwrap();
    assert_eq!(on_wire.protocol().as_str(), "encrypt-message");
    assert!(on_wire.extra.contains_key("nonce"));

    // Requeue the captured frame for the client's reader and observe the
    // decrypted envelope.
    server.conn.write(MessageType::Text, &raw).await.unwrap();
    let (_, received) = client.reader.read(&client.conn).await.unwrap();
    assert_eq!(received, message);
}

#[tokio::test]
async fn tampered_ciphertext_is_dropped_then_traffic_recovers() {
    let (server, client) = bound_pair(Duration::from_secs(300)).await;
    handshake(&server, &client).await;

    let message = app_message();
    server
        .writer
        .write(&server.conn, MessageType::Text, &message)
        .await
        .unwrap();

    // Capture the sealed frame and flip one ciphertext byte.
    let (_, raw) = client.conn.read().await.unwrap();
    let mut frame: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    let mut ciphertext = STANDARD
        .decode(frame["payload"].as_str().unwrap())
        .unwrap();
    ciphertext[0] ^= 0x01;
    frame["payload"] = serde_json::Value::String(STANDARD.encode(&ciphertext));

    server
        .conn
        .write(MessageType::Text, &serde_json::to_vec(&frame).unwrap())
        .await
        .unwrap();

    let result = client.reader.read(&client.conn).await;
    assert!(matches!(result, Err(InterceptorError::Crypto(_))));

    // Subsequent untampered frames decrypt fine.
    server
        .writer
        .write(&server.conn, MessageType::Text, &message)
        .await
        .unwrap();
    let (_, received) = client.reader.read(&client.conn).await.unwrap();
    assert_eq!(received, message);
}

#[tokio::test(start_paused = true)]
async fn forged_init_signature_is_rejected() {
    let (signing, _) = keypair();
    // The client trusts a different key than the one signing the handshake.
    let (_, other_verifying) = keypair();

    let (server_conn, client_conn) = MemoryConnection::pair();
    let server = build_side(
        "server",
        Role::Server,
        HandshakeKeys {
            signing: Some(signing),
            verifying: None,
        },
        server_conn,
        Duration::from_secs(300),
    );
    let client = build_side(
        "client-1",
        Role::Client,
        HandshakeKeys {
            signing: None,
            verifying: Some(other_verifying),
        },
        client_conn,
        Duration::from_secs(300),
    );

    server
        .interceptor
        .bind(
            server.conn.clone(),
            server.writer.clone(),
            server.reader.clone(),
        )
        .await
        .unwrap();
    client
        .interceptor
        .bind(
            client.conn.clone(),
            client.writer.clone(),
            client.reader.clone(),
        )
        .await
        .unwrap();

    let client_reader = client.reader.clone();
    let client_conn = client.conn.clone();
    let pump = tokio::spawn(async move {
        client_reader.read(&client_conn).await
    });

    // The client drops the forged init and never responds, so the initiator
    // times out; its session state stays unkeyed.
    let init_result = server.interceptor.init(&server.conn).await;
    assert!(matches!(
        init_result,
        Err(InterceptorError::HandshakeTimeout)
    ));

    let read_result = pump.await.unwrap();
    assert!(matches!(read_result, Err(InterceptorError::Crypto(_))));
    assert!(!client.interceptor.ready(client.conn.id()));
}

#[tokio::test(start_paused = true)]
async fn init_times_out_without_a_responder() {
    let (server, _client) = bound_pair(Duration::from_secs(300)).await;

    let result = server.interceptor.init(&server.conn).await;
    assert!(matches!(result, Err(InterceptorError::HandshakeTimeout)));
    assert!(!server.interceptor.ready(server.conn.id()));
}

#[tokio::test]
async fn session_rotation_invalidates_replayed_frames() {
    let (server, client) = bound_pair(Duration::from_millis(50)).await;
    handshake(&server, &client).await;

    // Capture a frame sealed under the original session id.
    let message = app_message();
    server
        .writer
        .write(&server.conn, MessageType::Text, &message)
        .await
        .unwrap();
    let (_, old_frame) = client.conn.read().await.unwrap();

    // Wait for the rotation loop to emit an update and let the client apply
    // it.
    let (_, update) = client.reader.read(&client.conn).await.unwrap();
    assert_eq!(update.protocol().as_str(), PROTOCOL_UPDATE_SESSION);

    // Fresh traffic is sealed under the rotated id and decrypts fine.
    server
        .writer
        .write(&server.conn, MessageType::Text, &message)
        .await
        .unwrap();
    let (_, received) = client.reader.read(&client.conn).await.unwrap();
    assert_eq!(received, message);

    // The pre-rotation frame no longer authenticates.
    server
        .conn
        .write(MessageType::Text, &old_frame)
        .await
        .unwrap();
    let replay = client.reader.read(&client.conn).await;
    assert!(matches!(replay, Err(InterceptorError::Crypto(_))));
}
