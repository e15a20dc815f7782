use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use hearst_auth::Keypair;
use hearst_server::{build_router, AppState};
use hearst_store::{Mailbox, Store, Thread, ThreadMember};
use hearst_stream::{Bus, EventStream};

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_server() -> (String, Arc<AppState>) {
    let state = AppState::new(
        Store::open_in_memory().unwrap(),
        EventStream::new(Bus::new()),
        Keypair::generate(),
        "test.hearst",
    );
    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr.to_string(), state)
}

async fn connect(addr: &str) -> WsClient {
    let (socket, _) = connect_async(format!("ws://{addr}/socket"))
        .await
        .expect("websocket upgrade failed");
    socket
}

async fn send_json(socket: &mut WsClient, value: Value) {
    socket
        .send(Message::Text(value.to_string()))
        .await
        .expect("websocket send failed");
}

async fn recv_json(socket: &mut WsClient) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .expect("websocket read failed");
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(payload) => {
                let _ = socket.send(Message::Pong(payload)).await;
            }
            _ => continue,
        }
    }
}

/// Register a mailbox whose private key the test holds.
fn register_mailbox(state: &AppState) -> (Mailbox, Keypair) {
    let keypair = Keypair::generate();
    let mut mailbox = Mailbox {
        public_key: keypair.public_armored(),
        ..Default::default()
    };
    state.store.insert_mailbox(&mut mailbox).unwrap();
    (mailbox, keypair)
}

/// Open a connection authenticated with a session envelope.
async fn connect_session(addr: &str, state: &AppState, mailbox: &Mailbox, key: &Keypair) -> WsClient {
    let mut socket = connect(addr).await;
    send_json(
        &mut socket,
        json!({
            "auth": "session",
            "mailbox": mailbox.id,
            "token": state.mint_session(key),
        }),
    )
    .await;
    socket
}

#[tokio::test]
async fn new_handshake_returns_credentials() {
    let (addr, state) = spawn_server().await;
    let mut socket = connect(&addr).await;

    send_json(&mut socket, json!({"auth": "new"})).await;
    let reply = recv_json(&mut socket).await;

    let mailbox_id = reply["mailbox_id"].as_str().unwrap();
    assert!(state.store.get_mailbox(mailbox_id).is_ok());
    assert!(reply["session_token"].as_str().is_some());

    // The returned private key pairs with the stored public key.
    let keypair =
        Keypair::from_private_armored(reply["private_key"].as_str().unwrap()).unwrap();
    let stored = state.store.get_mailbox(mailbox_id).unwrap();
    assert_eq!(stored.public_key, keypair.public_armored());
}

#[tokio::test]
async fn temp_handshake_withholds_private_key() {
    let (addr, _state) = spawn_server().await;
    let mut socket = connect(&addr).await;

    send_json(&mut socket, json!({"auth": "temp"})).await;
    let reply = recv_json(&mut socket).await;

    assert!(reply["mailbox_id"].as_str().is_some());
    assert!(reply["session_token"].as_str().is_some());
    assert!(reply.get("private_key").is_none());
}

#[tokio::test]
async fn invalid_auth_type_closes_the_connection() {
    let (addr, _state) = spawn_server().await;
    let mut socket = connect(&addr).await;

    send_json(&mut socket, json!({"auth": "wizard"})).await;
    let reply = recv_json(&mut socket).await;
    assert_eq!(reply["error"], "invalid auth type");

    // Nothing but close traffic after the refusal.
    loop {
        match timeout(Duration::from_secs(5), socket.next()).await.unwrap() {
            None | Some(Ok(Message::Close(_))) => break,
            Some(Ok(_)) => continue,
            Some(Err(_)) => break,
        }
    }
}

#[tokio::test]
async fn session_handshake_rejects_bad_envelopes() {
    let (addr, state) = spawn_server().await;
    let (mailbox, _key) = register_mailbox(&state);
    let intruder = Keypair::generate();

    let mut socket = connect(&addr).await;
    send_json(
        &mut socket,
        json!({
            "auth": "session",
            "mailbox": mailbox.id,
            // Signed by the wrong client key.
            "token": state.mint_session(&intruder),
        }),
    )
    .await;
    let reply = recv_json(&mut socket).await;
    assert_eq!(reply["error"], "client signature invalid");
}

#[tokio::test]
async fn create_thread_auto_grants_the_creator() {
    let (addr, state) = spawn_server().await;
    let mut socket = connect(&addr).await;

    send_json(&mut socket, json!({"auth": "new"})).await;
    let reply = recv_json(&mut socket).await;
    let mailbox_id = reply["mailbox_id"].as_str().unwrap().to_string();

    send_json(
        &mut socket,
        json!({"action": "create", "model": "thread", "rid": "t-1"}),
    )
    .await;
    send_json(&mut socket, json!({"subject": "war room"})).await;

    let reply = recv_json(&mut socket).await;
    assert_eq!(reply["rid"], "t-1");
    let thread_id = reply["payload"]["id"].as_str().unwrap();
    assert_eq!(reply["payload"]["subject"], "war room");

    let members = state.store.get_all_members(thread_id).unwrap();
    assert_eq!(members.len(), 1);
    let admin = &members[0];
    assert_eq!(admin.mailbox_id, mailbox_id);
    assert!(admin.allow_read && admin.allow_write && admin.allow_notification);
}

#[tokio::test]
async fn ordered_log_reaches_a_follower_in_order() {
    let (addr, state) = spawn_server().await;
    let (writer, writer_key) = register_mailbox(&state);
    let (follower, follower_key) = register_mailbox(&state);

    let mut thread = Thread::default();
    state.store.insert_thread(&mut thread, Some(&writer.id)).unwrap();
    state
        .store
        .add_member(&ThreadMember {
            thread_id: thread.id.clone(),
            mailbox_id: follower.id.clone(),
            allow_read: true,
            allow_write: false,
            allow_notification: true,
        })
        .unwrap();

    // The follower subscribes first and sees the empty history.
    let mut follower_sock = connect_session(&addr, &state, &follower, &follower_key).await;
    send_json(
        &mut follower_sock,
        json!({
            "action": "list",
            "model": "thread",
            "id": thread.id,
            "follow": "true",
            "rid": "sub",
        }),
    )
    .await;
    let history = recv_json(&mut follower_sock).await;
    assert_eq!(history["rid"], "sub");
    assert_eq!(history["payload"], json!([]));

    // The writer inserts three messages in order.
    let mut writer_sock = connect_session(&addr, &state, &writer, &writer_key).await;
    for n in 1..=3 {
        send_json(
            &mut writer_sock,
            json!({"action": "create", "model": "message", "rid": format!("m-{n}")}),
        )
        .await;
        send_json(
            &mut writer_sock,
            json!({"thread_id": thread.id, "body": format!("m{n}"), "sender_mailbox_id": writer.id}),
        )
        .await;
        let reply = recv_json(&mut writer_sock).await;
        assert_eq!(reply["rid"], format!("m-{n}"));
        assert_eq!(reply["payload"]["body"], format!("m{n}"));
    }

    // The follower observes exactly m1, m2, m3 with increasing indices.
    let mut last_index = 0;
    for n in 1..=3 {
        let frame = recv_json(&mut follower_sock).await;
        let event = &frame[0];
        assert_eq!(event["model"], "message");
        assert_eq!(event["action"], "insert");
        assert_eq!(event["object_id"], json!(thread.id));
        assert_eq!(event["payload"]["body"], format!("m{n}"));
        let index = event["payload"]["index"].as_i64().unwrap();
        assert!(index > last_index);
        last_index = index;
    }
}

#[tokio::test]
async fn write_denied_member_cannot_create_messages() {
    let (addr, state) = spawn_server().await;
    let (admin, _admin_key) = register_mailbox(&state);
    let (reader, reader_key) = register_mailbox(&state);

    let mut thread = Thread::default();
    state.store.insert_thread(&mut thread, Some(&admin.id)).unwrap();
    state
        .store
        .add_member(&ThreadMember {
            thread_id: thread.id.clone(),
            mailbox_id: reader.id.clone(),
            allow_read: true,
            allow_write: false,
            allow_notification: true,
        })
        .unwrap();

    let mut events = state
        .stream
        .event_channel(&format!("message-insert-{}", thread.id))
        .await;

    let mut socket = connect_session(&addr, &state, &reader, &reader_key).await;
    send_json(
        &mut socket,
        json!({"action": "create", "model": "message", "rid": "denied"}),
    )
    .await;
    send_json(&mut socket, json!({"thread_id": thread.id, "body": "let me in"})).await;

    let reply = recv_json(&mut socket).await;
    assert_eq!(reply["rid"], "denied");
    assert_eq!(reply["payload"]["error"], "access denied");

    // No row landed and no event went out.
    assert!(state.store.recent_messages(&thread.id, 10).unwrap().is_empty());
    assert!(
        timeout(Duration::from_millis(300), events.recv())
            .await
            .is_err(),
        "no insert event may be published for a denied write"
    );
}

#[tokio::test]
async fn read_without_membership_is_denied() {
    let (addr, state) = spawn_server().await;
    let (admin, _admin_key) = register_mailbox(&state);
    let (outsider, outsider_key) = register_mailbox(&state);

    let mut thread = Thread::default();
    state.store.insert_thread(&mut thread, Some(&admin.id)).unwrap();

    let mut socket = connect_session(&addr, &state, &outsider, &outsider_key).await;
    send_json(
        &mut socket,
        json!({"action": "read", "model": "thread", "id": thread.id}),
    )
    .await;
    let reply = recv_json(&mut socket).await;
    assert_eq!(reply["error"], "access denied");

    send_json(
        &mut socket,
        json!({"action": "list", "model": "thread", "id": thread.id}),
    )
    .await;
    let reply = recv_json(&mut socket).await;
    assert_eq!(reply["error"], "access denied");
}

#[tokio::test]
async fn list_supports_topic_filter_and_catch_up() {
    let (addr, state) = spawn_server().await;
    let (member, member_key) = register_mailbox(&state);

    let mut thread = Thread::default();
    state.store.insert_thread(&mut thread, Some(&member.id)).unwrap();
    for n in 1..=6 {
        let topic = if n % 2 == 0 { "even" } else { "odd" };
        let mut message = hearst_store::Message {
            thread_id: thread.id.clone(),
            topic: topic.into(),
            body: format!("m{n}"),
            ..Default::default()
        };
        state.store.insert_message(&mut message).unwrap();
    }

    let mut socket = connect_session(&addr, &state, &member, &member_key).await;

    send_json(
        &mut socket,
        json!({"action": "list", "model": "thread", "id": thread.id, "topic": "even"}),
    )
    .await;
    let evens = recv_json(&mut socket).await;
    assert_eq!(evens.as_array().unwrap().len(), 3);

    send_json(
        &mut socket,
        json!({"action": "list", "model": "thread", "id": thread.id, "last_seq": "4"}),
    )
    .await;
    let tail = recv_json(&mut socket).await;
    let indices: Vec<i64> = tail
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["index"].as_i64().unwrap())
        .collect();
    assert_eq!(indices, vec![5, 6]);
}

#[tokio::test]
async fn unwrapped_responses_without_rid() {
    let (addr, state) = spawn_server().await;
    let (member, member_key) = register_mailbox(&state);

    let mut socket = connect_session(&addr, &state, &member, &member_key).await;
    send_json(
        &mut socket,
        json!({"action": "read", "model": "mailbox", "id": member.id}),
    )
    .await;
    let reply = recv_json(&mut socket).await;
    // Bare payload: the mailbox itself, no {rid, payload} wrapper.
    assert_eq!(reply["id"], json!(member.id));
    assert!(reply.get("payload").is_none());
}

#[tokio::test]
async fn mailbox_mutation_is_holder_only() {
    let (addr, state) = spawn_server().await;
    let (victim, _victim_key) = register_mailbox(&state);
    let (attacker, attacker_key) = register_mailbox(&state);

    let mut socket = connect_session(&addr, &state, &attacker, &attacker_key).await;
    send_json(
        &mut socket,
        json!({"action": "delete", "model": "mailbox", "id": victim.id}),
    )
    .await;
    let reply = recv_json(&mut socket).await;
    assert_eq!(reply["error"], "access denied");
    assert!(state.store.get_mailbox(&victim.id).is_ok());
}
