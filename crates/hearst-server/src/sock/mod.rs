pub mod dispatch;
pub mod proto;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use hearst_auth::{public_from_armored, Keypair, Session};
use hearst_store::Mailbox;

use crate::records::Record;
use crate::sock::proto::{error_payload, respond, SockRequest};
use crate::state::AppState;

/// Control-ping cadence. A silent client keeps receiving pings and is only
/// torn down once a write fails.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Bound on the per-connection response queue.
pub const RESPONSE_QUEUE_CAPACITY: usize = 10;

/// WebSocket upgrade at /socket; the duplex protocol runs after upgrade.
pub async fn socket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection task topology: this task reads and dispatches; a single
/// writer task owns all transport writes; dispatch spawns a short-lived
/// worker per request so slow store calls never block the next frame.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sender, mut receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Value>(RESPONSE_QUEUE_CAPACITY);
    let writer = tokio::spawn(write_loop(sender, rx));

    if let Some(client) = identify_client(&state, &mut receiver, &tx).await {
        state.store.touch_mailbox(&client.id);
        read_loop(&state, &client, &mut receiver, &tx).await;
    }

    // Dropping the reader's handle lets the queue close once the last
    // worker finishes; the writer exits on closure or on a failed write.
    drop(tx);
    let _ = writer.await;
    tracing::debug!("socket connection closed");
}

/// The single writer: drains the response queue and emits keepalive pings.
/// Nothing else may write to the transport.
async fn write_loop(mut sender: SplitSink<WebSocket, Message>, mut responses: mpsc::Receiver<Value>) {
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            response = responses.recv() => match response {
                Some(payload) => {
                    if sender.send(Message::text(payload.to_string())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = keepalive.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
    // The receiver drops here, closing the queue for every worker.
}

/// The handshake. The first frame must carry `auth` in
/// {session, new, temp}; anything else answers an error and closes.
async fn identify_client(
    state: &Arc<AppState>,
    receiver: &mut SplitStream<WebSocket>,
    tx: &mpsc::Sender<Value>,
) -> Option<Mailbox> {
    let text = next_text(receiver).await?;
    let Some(request) = SockRequest::parse(&text) else {
        respond(tx, None, error_payload("client failed to identify itself"));
        return None;
    };

    match request.get("auth") {
        Some("session") => {
            let (Some(mailbox_id), Some(token)) = (request.get("mailbox"), request.get("token"))
            else {
                respond(tx, None, error_payload("mailbox and token required"));
                return None;
            };

            let Ok(mailbox) = state.store.get_mailbox(mailbox_id) else {
                respond(tx, None, error_payload("mailbox not found"));
                return None;
            };
            let Ok(client_key) = public_from_armored(&mailbox.public_key) else {
                respond(tx, None, error_payload("mailbox key invalid"));
                return None;
            };
            let session = match Session::parse(token) {
                Ok(session) => session,
                Err(err) => {
                    respond(tx, None, error_payload(&err.to_string()));
                    return None;
                }
            };

            match session.validate(&client_key, &state.server_key.public_key()) {
                Ok(()) => Some(mailbox),
                Err(err) => {
                    respond(tx, None, error_payload(&err.to_string()));
                    None
                }
            }
        }
        Some(mode @ ("new" | "temp")) => {
            // First-run clients: mint a keypair and a mailbox to go with
            // it. `temp` keeps the private key server-side, so the session
            // dies with the connection.
            let keypair = Keypair::generate();
            let mut record = Record::Mailbox(Mailbox {
                public_key: keypair.public_armored(),
                ..Default::default()
            });
            if let Err(err) = state.insert_record(&mut record, None) {
                tracing::warn!(%err, "could not register mailbox during handshake");
                respond(tx, None, error_payload("could not create mailbox"));
                return None;
            }
            let Record::Mailbox(mailbox) = record else {
                return None;
            };

            let mut reply = json!({
                "mailbox_id": mailbox.id,
                "session_token": state.mint_session(&keypair),
            });
            if mode == "new" {
                reply["private_key"] = Value::String(keypair.private_armored());
            }
            respond(tx, None, reply);
            Some(mailbox)
        }
        _ => {
            respond(tx, None, error_payload("invalid auth type"));
            None
        }
    }
}

/// Post-handshake frame pump. This loop is the sole consumer of inbound
/// frames, which is what makes the create/update body-follows-request
/// ordering safe.
async fn read_loop(
    state: &Arc<AppState>,
    client: &Mailbox,
    receiver: &mut SplitStream<WebSocket>,
    tx: &mpsc::Sender<Value>,
) {
    while let Some(frame) = receiver.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(%err, "socket read error");
                break;
            }
        };

        // Every inbound frame, pongs included, is a liveness signal.
        state.store.touch_mailbox(&client.id);

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let Some(request) = SockRequest::parse(text.as_str()) else {
            respond(tx, None, error_payload("invalid request"));
            continue;
        };

        dispatch::handle(state, client, request, receiver, tx).await;
    }
}

/// The next text frame, skipping control traffic. `None` means the
/// connection is gone.
pub(crate) async fn next_text(receiver: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => return Some(text.to_string()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}
