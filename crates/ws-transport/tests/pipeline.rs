//! Full-stack scenario: two clients talk to one server chain (encryption,
//! traffic logging, rooms) over WebSocket streams.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use tokio_tungstenite::tungstenite::protocol::Role as WsRole;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use encrypt_interceptor::{EncryptInterceptor, HandshakeKeys};
use interceptor::config::Role;
use interceptor::{
    Chain, Connection, Envelope, FrameReader, FrameWriter, Interceptor, InterceptorError, Reader,
    SharedConnection, SharedReader, SharedWriter, Writer,
};
use log_interceptor::{LogInterceptor, MemorySink, SharedSink, SinkError, SinkFactory};
use room_interceptor::{RoomInterceptor, RoomMessage, RoomPayload};
use ws_transport::WsConnection;

/// Hands the same in-memory sink to every connection so the test can inspect
/// all traffic in one place.
struct SharedMemorySinks {
    sink: Arc<MemorySink>,
}

#[async_trait]
impl SinkFactory for SharedMemorySinks {
    async fn create(&self, _connection_id: &str) -> Result<Vec<SharedSink>, SinkError> {
        Ok(vec![self.sink.clone()])
    }
}

struct Server {
    chain: Arc<Chain>,
    encrypt: Arc<EncryptInterceptor>,
    records: Arc<MemorySink>,
}

fn server_stack(signing: SigningKey) -> Server {
    let token = CancellationToken::new();
    let encrypt = Arc::new(EncryptInterceptor::new(
        token.child_token(),
        "server",
        Role::Server,
        HandshakeKeys {
            signing: Some(signing),
            verifying: None,
        },
    ));
    let records = Arc::new(MemorySink::new());
    let log = Arc::new(LogInterceptor::new(
        token.child_token(),
        Arc::new(SharedMemorySinks {
            sink: records.clone(),
        }),
    ));
    let rooms = Arc::new(RoomInterceptor::new(token.child_token()));

    // Encryption sits closest to the transport so the logger and the room
    // layer both see plaintext.
    let chain = Arc::new(Chain::new(vec![
        encrypt.clone() as Arc<dyn Interceptor>,
        log as Arc<dyn Interceptor>,
        rooms as Arc<dyn Interceptor>,
    ]));

    Server {
        chain,
        encrypt,
        records,
    }
}

struct ClientSide {
    conn: SharedConnection,
    writer: SharedWriter,
    reader: SharedReader,
}

impl ClientSide {
    async fn send(&self, name: &str, payload: RoomPayload) {
        let message = RoomMessage::new(name, "server", payload);
        self.writer
            .write(
                &self.conn,
                interceptor::MessageType::Text,
                &Envelope::encode(&message).unwrap(),
            )
            .await
            .unwrap();
    }

    /// Read until a room payload for which `want` returns true arrives.
    async fn expect_room(&self, want: impl Fn(&RoomPayload) -> bool) -> RoomPayload {
        loop {
            let (_, envelope) = self.reader.read(&self.conn).await.unwrap();
            if *envelope.protocol() != *room_interceptor::PROTOCOL_ROOM {
                continue;
            }
            let message: RoomMessage = envelope.decode().unwrap();
            if want(&message.payload) {
                return message.payload;
            }
        }
    }
}

/// Connect one client: a WebSocket pair over a duplex stream, bound into the
/// server chain on one side and into a client-side encryption chain on the
/// other, with the handshake completed.
async fn connect_client(server: &Server, verifying: ed25519_dalek::VerifyingKey, id: &str) -> ClientSide {
    let (client_io, server_io) = tokio::io::duplex(16 * 1024);
    let client_ws = WebSocketStream::from_raw_socket(client_io, WsRole::Client, None).await;
    let server_ws = WebSocketStream::from_raw_socket(server_io, WsRole::Server, None).await;

    let server_conn: SharedConnection = WsConnection::new(server_ws);
    let client_conn: SharedConnection = WsConnection::new(client_ws);

    // Server side: bind into the shared chain (which composes the full
    // stack from the base codec) and keep a composed reader for the pump.
    server
        .chain
        .bind(
            server_conn.clone(),
            Arc::new(FrameWriter),
            Arc::new(FrameReader),
        )
        .await
        .unwrap();
    let server_reader = server.chain.intercept_reader(Arc::new(FrameReader));

    // Client side: its own encryption interceptor in client role.
    let client_encrypt = Arc::new(EncryptInterceptor::new(
        CancellationToken::new(),
        id,
        Role::Client,
        HandshakeKeys {
            signing: None,
            verifying: Some(verifying),
        },
    ));
    let client_writer = client_encrypt.intercept_writer(Arc::new(FrameWriter));
    let client_reader = client_encrypt.intercept_reader(Arc::new(FrameReader));
    client_encrypt
        .bind(
            client_conn.clone(),
            client_writer.clone(),
            client_reader.clone(),
        )
        .await
        .unwrap();

    // Drive the handshake: the client pump handles Init and InitDone, the
    // server pump handles InitResponse.
    let pump_reader = client_reader.clone();
    let pump_conn = client_conn.clone();
    let client_pump = tokio::spawn(async move {
        pump_reader.read(&pump_conn).await.unwrap();
        pump_reader.read(&pump_conn).await.unwrap();
    });
    let pump_reader = server_reader.clone();
    let pump_conn = server_conn.clone();
    let server_handshake_pump = tokio::spawn(async move {
        pump_reader.read(&pump_conn).await.unwrap();
    });

    server.encrypt.init(&server_conn).await.unwrap();
    client_pump.await.unwrap();
    server_handshake_pump.await.unwrap();

    assert!(server.encrypt.ready(server_conn.id()));

    // From here on the server processes this connection in the background.
    tokio::spawn(async move {
        loop {
            match server_reader.read(&server_conn).await {
                Ok(_) => {}
                Err(InterceptorError::ConnectionClosed) => return,
                Err(err) => tracing::debug!(%err, "server pump error"),
            }
        }
    });

    ClientSide {
        conn: client_conn,
        writer: client_writer,
        reader: client_reader,
    }
}

#[tokio::test]
async fn encrypted_room_chat_end_to_end() {
    let signing = SigningKey::generate(&mut OsRng);
    let verifying = signing.verifying_key();
    let server = server_stack(signing);

    let alice = connect_client(&server, verifying, "alice").await;
    let bob = connect_client(&server, verifying, "bob").await;

    // Alice opens a room that both of them may use.
    alice
        .send(
            "alice",
            RoomPayload::CreateRoom {
                room_id: "ops".into(),
                close_after_secs: 3600,
                clients_to_allow: vec!["alice".into(), "bob".into()],
            },
        )
        .await;
    let ack = alice
        .expect_room(|p| matches!(p, RoomPayload::Success { .. } | RoomPayload::Error { .. }))
        .await;
    assert!(matches!(ack, RoomPayload::Success { .. }), "{ack:?}");

    // Bob joins.
    bob.send("bob", RoomPayload::JoinRoom { room_id: "ops".into() })
        .await;
    let ack = bob
        .expect_room(|p| matches!(p, RoomPayload::Success { .. } | RoomPayload::Error { .. }))
        .await;
    assert!(matches!(ack, RoomPayload::Success { .. }), "{ack:?}");

    // Alice broadcasts; as room owner she is excluded from her own
    // fan-out, leaving bob as the only recipient.
    alice
        .send(
            "alice",
            RoomPayload::ChatSource {
                room_id: "ops".into(),
                message_id: "m-1".into(),
                recipient_ids: Vec::new(),
                content: "hi".into(),
                timestamp: Utc::now(),
            },
        )
        .await;

    let delivery = bob
        .expect_room(|p| matches!(p, RoomPayload::ChatDest { .. }))
        .await;
    match delivery {
        RoomPayload::ChatDest {
            room_id, content, ..
        } => {
            assert_eq!(room_id, "ops");
            assert_eq!(content, "hi");
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    let ack = alice
        .expect_room(|p| matches!(p, RoomPayload::Success { .. } | RoomPayload::Error { .. }))
        .await;
    assert!(matches!(ack, RoomPayload::Success { .. }), "{ack:?}");

    // The traffic log saw the room operations in plaintext, after the
    // encryption layer unwrapped them.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let records = server.records.records();
    assert!(records
        .iter()
        .any(|r| r.envelope.protocol().as_str() == "room"));
    assert!(records
        .iter()
        .all(|r| r.envelope.protocol().as_str() != "encrypt-message"));
}
