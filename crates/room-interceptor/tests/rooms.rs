//! Room membership and chat fan-out scenarios over an in-memory transport.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use interceptor::testing::MemoryConnection;
use interceptor::{
    Envelope, FrameReader, FrameWriter, Interceptor, MessageType, Reader, SharedConnection,
    Writer,
};
use room_interceptor::{RoomInterceptor, RoomMessage, RoomPayload};

/// One client as seen from both sides: the server-side bound connection and
/// the raw remote end the test drives.
struct Client {
    name: &'static str,
    server_conn: SharedConnection,
    server_reader: Arc<dyn Reader>,
    remote: SharedConnection,
}

impl Client {
    /// Send a room payload from the remote end and let the server process
    /// it.
    async fn request(&self, payload: RoomPayload) {
        let message = RoomMessage::new(self.name, "server", payload);
        FrameWriter
            .write(
                &self.remote,
                MessageType::Text,
                &Envelope::encode(&message).unwrap(),
            )
            .await
            .unwrap();
        self.server_reader.read(&self.server_conn).await.unwrap();
    }

    /// Next room message delivered to the remote end.
    async fn next(&self) -> RoomPayload {
        let (_, envelope) = FrameReader.read(&self.remote).await.unwrap();
        envelope.decode::<RoomMessage>().unwrap().payload
    }

    /// Drain deliveries until a success/error ack arrives, returning the
    /// skipped messages and the ack.
    async fn next_ack(&self) -> (Vec<RoomPayload>, RoomPayload) {
        let mut skipped = Vec::new();
        loop {
            let payload = self.next().await;
            match payload {
                RoomPayload::Success { .. } | RoomPayload::Error { .. } => {
                    return (skipped, payload)
                }
                other => skipped.push(other),
            }
        }
    }
}

struct Fixture {
    interceptor: Arc<RoomInterceptor>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            interceptor: Arc::new(RoomInterceptor::new(CancellationToken::new())),
        }
    }

    async fn client(&self, name: &'static str) -> Client {
        let (server_conn, remote) = MemoryConnection::pair();
        let server_conn: SharedConnection = server_conn;
        let remote: SharedConnection = remote;

        let writer = self.interceptor.intercept_writer(Arc::new(FrameWriter));
        let reader = self.interceptor.intercept_reader(Arc::new(FrameReader));
        self.interceptor
            .bind(server_conn.clone(), writer, reader.clone())
            .await
            .unwrap();

        Client {
            name,
            server_conn,
            server_reader: reader,
            remote,
        }
    }
}

fn create_room(room_id: &str, allow: &[&str]) -> RoomPayload {
    RoomPayload::CreateRoom {
        room_id: room_id.into(),
        close_after_secs: 3600,
        clients_to_allow: allow.iter().map(|s| s.to_string()).collect(),
    }
}

fn join(room_id: &str) -> RoomPayload {
    RoomPayload::JoinRoom {
        room_id: room_id.into(),
    }
}

fn expect_success(payload: &RoomPayload) {
    assert!(
        matches!(payload, RoomPayload::Success { .. }),
        "expected success, got {payload:?}"
    );
}

fn expect_error(payload: &RoomPayload, needle: &str) {
    match payload {
        RoomPayload::Error { message } => {
            assert!(message.contains(needle), "unexpected error: {message}")
        }
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn create_then_allowed_join_succeeds() {
    let fixture = Fixture::new();
    let alice = fixture.client("alice").await;
    let bob = fixture.client("bob").await;

    alice.request(create_room("lobby", &["bob"])).await;
    expect_success(&alice.next().await);

    bob.request(join("lobby")).await;
    let (_, ack) = bob.next_ack().await;
    expect_success(&ack);

    // Alice, already in the room, hears about the join.
    let joined = alice.next().await;
    assert!(
        matches!(joined, RoomPayload::ClientJoined { ref client_id, .. } if client_id == "bob")
    );

    let room = fixture.interceptor.room("lobby").await.unwrap();
    let mut ids = room.participant_ids().await;
    ids.sort();
    assert_eq!(ids, vec!["alice".to_string(), "bob".to_string()]);
}

#[tokio::test]
async fn join_outside_the_allow_list_is_rejected() {
    let fixture = Fixture::new();
    let alice = fixture.client("alice").await;
    let mallory = fixture.client("mallory").await;

    alice.request(create_room("lobby", &["bob"])).await;
    expect_success(&alice.next().await);

    mallory.request(join("lobby")).await;
    let (_, ack) = mallory.next_ack().await;
    expect_error(&ack, "not allowed");
}

#[tokio::test]
async fn duplicate_join_is_rejected() {
    let fixture = Fixture::new();
    let alice = fixture.client("alice").await;
    let bob = fixture.client("bob").await;

    alice.request(create_room("lobby", &["bob"])).await;
    expect_success(&alice.next().await);

    bob.request(join("lobby")).await;
    let (_, first) = bob.next_ack().await;
    expect_success(&first);

    bob.request(join("lobby")).await;
    let (_, second) = bob.next_ack().await;
    expect_error(&second, "already exists");
}

#[tokio::test]
async fn creating_an_existing_room_falls_back_to_join() {
    let fixture = Fixture::new();
    let alice = fixture.client("alice").await;
    let bob = fixture.client("bob").await;

    alice.request(create_room("lobby", &["bob"])).await;
    expect_success(&alice.next().await);

    bob.request(create_room("lobby", &[])).await;
    let (_, ack) = bob.next_ack().await;
    expect_success(&ack);

    let room = fixture.interceptor.room("lobby").await.unwrap();
    assert_eq!(room.participant_ids().await.len(), 2);
}

#[tokio::test]
async fn broadcast_reaches_joined_allow_list_members_only() {
    let fixture = Fixture::new();
    let alice = fixture.client("alice").await;
    let bob = fixture.client("bob").await;
    let carol = fixture.client("carol").await;
    let dave = fixture.client("dave").await;

    // Alice owns the room; only bob, carol and dave may join (and therefore
    // receive broadcasts).
    alice.request(create_room("lobby", &["bob", "carol", "dave"])).await;
    expect_success(&alice.next().await);

    for client in [&bob, &carol, &dave] {
        client.request(join("lobby")).await;
        let (_, ack) = client.next_ack().await;
        expect_success(&ack);
    }

    bob.request(RoomPayload::ChatSource {
        room_id: "lobby".into(),
        message_id: "m-1".into(),
        recipient_ids: Vec::new(),
        content: "hi".into(),
        timestamp: Utc::now(),
    })
    .await;

    // The sender gets exactly one ack, no delivery errors before it.
    let (before_ack, ack) = bob.next_ack().await;
    expect_success(&ack);
    assert!(
        !before_ack
            .iter()
            .any(|p| matches!(p, RoomPayload::ChatDest { .. })),
        "sender must not receive its own broadcast"
    );

    // Carol and dave each receive the chat (after their join notifications).
    for client in [&carol, &dave] {
        loop {
            match client.next().await {
                RoomPayload::ChatDest {
                    ref content,
                    ref room_id,
                    ..
                } => {
                    assert_eq!(content, "hi");
                    assert_eq!(room_id, "lobby");
                    break;
                }
                RoomPayload::ClientJoined { .. } => continue,
                other => panic!("unexpected payload: {other:?}"),
            }
        }
    }

    // Alice is outside the allow-list: she only ever saw join notifications.
    alice.request(RoomPayload::LeaveRoom {
        room_id: "lobby".into(),
    })
    .await;
    let (skipped, ack) = alice.next_ack().await;
    expect_success(&ack);
    assert!(
        skipped
            .iter()
            .all(|p| matches!(p, RoomPayload::ClientJoined { .. })),
        "owner outside the allow-list must not receive broadcasts: {skipped:?}"
    );
}

#[tokio::test]
async fn allow_listed_owner_is_excluded_from_broadcasts() {
    let fixture = Fixture::new();
    let alice = fixture.client("alice").await;
    let bob = fixture.client("bob").await;
    let carol = fixture.client("carol").await;

    // The owner lists itself in its own allow-list.
    alice
        .request(create_room("lobby", &["alice", "bob", "carol"]))
        .await;
    expect_success(&alice.next().await);

    for client in [&bob, &carol] {
        client.request(join("lobby")).await;
        let (_, ack) = client.next_ack().await;
        expect_success(&ack);
    }

    bob.request(RoomPayload::ChatSource {
        room_id: "lobby".into(),
        message_id: "m-1".into(),
        recipient_ids: Vec::new(),
        content: "hi".into(),
        timestamp: Utc::now(),
    })
    .await;

    let (_, ack) = bob.next_ack().await;
    expect_success(&ack);

    loop {
        match carol.next().await {
            RoomPayload::ChatDest { ref content, .. } => {
                assert_eq!(content, "hi");
                break;
            }
            RoomPayload::ClientJoined { .. } => continue,
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    // The owner saw only the join notifications — no chat — despite being
    // in the allow-list.
    alice
        .request(RoomPayload::LeaveRoom {
            room_id: "lobby".into(),
        })
        .await;
    let (skipped, ack) = alice.next_ack().await;
    expect_success(&ack);
    assert!(
        skipped
            .iter()
            .all(|p| matches!(p, RoomPayload::ClientJoined { .. })),
        "allow-listed owner must not receive broadcasts: {skipped:?}"
    );
}

#[tokio::test]
async fn directed_chat_can_still_reach_the_owner() {
    let fixture = Fixture::new();
    let alice = fixture.client("alice").await;
    let bob = fixture.client("bob").await;

    alice.request(create_room("lobby", &["alice", "bob"])).await;
    expect_success(&alice.next().await);

    bob.request(join("lobby")).await;
    let (_, ack) = bob.next_ack().await;
    expect_success(&ack);

    bob.request(RoomPayload::ChatSource {
        room_id: "lobby".into(),
        message_id: "m-2".into(),
        recipient_ids: vec!["alice".into()],
        content: "for the owner".into(),
        timestamp: Utc::now(),
    })
    .await;
    let (_, ack) = bob.next_ack().await;
    expect_success(&ack);

    loop {
        match alice.next().await {
            RoomPayload::ChatDest { ref content, .. } => {
                assert_eq!(content, "for the owner");
                break;
            }
            RoomPayload::ClientJoined { .. } => continue,
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}

#[tokio::test]
async fn chat_from_a_non_participant_is_rejected() {
    let fixture = Fixture::new();
    let alice = fixture.client("alice").await;
    let mallory = fixture.client("mallory").await;

    alice.request(create_room("lobby", &["bob"])).await;
    expect_success(&alice.next().await);

    // Mallory never joined; the sender is resolved by connection, so a
    // forged header does not help.
    mallory
        .request(RoomPayload::ChatSource {
            room_id: "lobby".into(),
            message_id: "m-1".into(),
            recipient_ids: Vec::new(),
            content: "spoofed".into(),
            timestamp: Utc::now(),
        })
        .await;
    let (_, ack) = mallory.next_ack().await;
    expect_error(&ack, "not a participant");
}

#[tokio::test]
async fn owner_leaving_keeps_the_room_alive() {
    let fixture = Fixture::new();
    let alice = fixture.client("alice").await;
    let bob = fixture.client("bob").await;

    alice.request(create_room("lobby", &["bob"])).await;
    expect_success(&alice.next().await);

    bob.request(join("lobby")).await;
    let (_, ack) = bob.next_ack().await;
    expect_success(&ack);

    alice
        .request(RoomPayload::LeaveRoom {
            room_id: "lobby".into(),
        })
        .await;
    let (_, ack) = alice.next_ack().await;
    expect_success(&ack);

    let room = fixture.interceptor.room("lobby").await.unwrap();
    assert_eq!(room.owner().await, None);
    assert_eq!(room.participant_ids().await, vec!["bob".to_string()]);
}

#[tokio::test]
async fn unbind_clears_ownership_but_not_membership() {
    let fixture = Fixture::new();
    let alice = fixture.client("alice").await;
    let bob = fixture.client("bob").await;

    alice.request(create_room("lobby", &["bob"])).await;
    expect_success(&alice.next().await);

    bob.request(join("lobby")).await;
    let (_, ack) = bob.next_ack().await;
    expect_success(&ack);

    fixture.interceptor.unbind(&alice.server_conn).await;

    let room = fixture.interceptor.room("lobby").await.unwrap();
    assert_eq!(room.owner().await, None);
    // Stale membership survives until the TTL or an explicit leave.
    assert_eq!(room.participant_ids().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn ttl_expiry_closes_the_room() {
    let fixture = Fixture::new();
    let alice = fixture.client("alice").await;

    alice
        .request(RoomPayload::CreateRoom {
            room_id: "ephemeral".into(),
            close_after_secs: 5,
            clients_to_allow: Vec::new(),
        })
        .await;
    expect_success(&alice.next().await);

    let room = fixture.interceptor.room("ephemeral").await.unwrap();
    assert!(!room.token().is_cancelled());

    // Virtual time runs past the TTL.
    tokio::time::sleep(std::time::Duration::from_secs(6)).await;

    assert!(fixture.interceptor.room("ephemeral").await.is_none());
    assert!(room.token().is_cancelled());
}

#[tokio::test]
async fn chat_into_an_unknown_room_errors() {
    let fixture = Fixture::new();
    let alice = fixture.client("alice").await;

    alice
        .request(RoomPayload::ChatSource {
            room_id: "nowhere".into(),
            message_id: "m-1".into(),
            recipient_ids: Vec::new(),
            content: "hello?".into(),
            timestamp: Utc::now(),
        })
        .await;
    let (_, ack) = alice.next_ack().await;
    expect_error(&ack, "does not exist");
}
