use std::sync::Arc;

use axum::extract::ws::WebSocket;
use futures_util::stream::SplitStream;
use serde_json::Value;
use tokio::sync::mpsc;

use hearst_store::{Mailbox, StoreError};

use crate::records::{Model, Record, RecordKey};
use crate::sock::next_text;
use crate::sock::proto::{error_payload, respond, SockRequest};
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: i64 = 50;

/// Route one request. Create and update consume the entity body from the
/// next inbound frame before anything is spawned, so body parsing stays in
/// the reader task's serial order.
pub async fn handle(
    state: &Arc<AppState>,
    client: &Mailbox,
    request: SockRequest,
    receiver: &mut SplitStream<WebSocket>,
    tx: &mpsc::Sender<Value>,
) {
    let action = request.action().to_string();
    match action.as_str() {
        "create" => create(state, client, request, receiver, tx).await,
        "read" => read(state, client, request, tx),
        "update" => update(state, client, request, receiver, tx).await,
        "delete" => delete(state, client, request, tx),
        "list" => list(state, client, request, tx),
        _ => respond(tx, request.rid(), error_payload("invalid action")),
    }
}

/// Read the entity body that must follow a create/update frame. `None`
/// means the connection died mid-protocol.
async fn entity_body(
    state: &Arc<AppState>,
    client: &Mailbox,
    request: &SockRequest,
    receiver: &mut SplitStream<WebSocket>,
    tx: &mpsc::Sender<Value>,
) -> Option<Value> {
    let text = next_text(receiver).await?;
    state.store.touch_mailbox(&client.id);
    match serde_json::from_str(&text) {
        Ok(body) => Some(body),
        Err(_) => {
            respond(tx, request.rid(), error_payload("invalid entity body"));
            None
        }
    }
}

async fn create(
    state: &Arc<AppState>,
    client: &Mailbox,
    request: SockRequest,
    receiver: &mut SplitStream<WebSocket>,
    tx: &mpsc::Sender<Value>,
) {
    let Some(model) = Model::parse(request.model()) else {
        respond(tx, request.rid(), error_payload("invalid model type"));
        return;
    };
    let Some(body) = entity_body(state, client, &request, receiver, tx).await else {
        return;
    };
    let record = match Record::from_body(model, body) {
        Ok(record) => record,
        Err(_) => {
            respond(tx, request.rid(), error_payload("invalid entity body"));
            return;
        }
    };

    let state = state.clone();
    let client_id = client.id.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let rid = request.rid();

        let allowed = match &record {
            // A brand-new thread has no members yet: creating one is open
            // to any authenticated client, who becomes its admin below.
            Record::Thread(_) => true,
            other => state.store.can_write(&client_id, other.permission_thread()),
        };
        if !allowed {
            respond(&tx, rid, error_payload("access denied"));
            return;
        }

        let creator = matches!(record, Record::Thread(_)).then_some(client_id.as_str());
        let mut record = record;
        match state.insert_record(&mut record, creator) {
            Ok(()) => respond(&tx, rid, record.to_value()),
            Err(StoreError::NotFound) => respond(&tx, rid, error_payload("not found")),
            Err(err) => {
                tracing::warn!(%err, "duplex create failed");
                respond(&tx, rid, error_payload("could not create object"));
            }
        }
    });
}

fn read(state: &Arc<AppState>, client: &Mailbox, request: SockRequest, tx: &mpsc::Sender<Value>) {
    let Some(model) = Model::parse(request.model()) else {
        respond(tx, request.rid(), error_payload("invalid model type"));
        return;
    };

    let state = state.clone();
    let client_id = client.id.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let rid = request.rid();
        match load_requested(&state, model, &request) {
            Ok(record) => {
                if state.store.can_read(&client_id, record.permission_thread()) {
                    respond(&tx, rid, record.to_value());
                } else {
                    respond(&tx, rid, error_payload("access denied"));
                }
            }
            Err(StoreError::NotFound) => respond(&tx, rid, error_payload("not found")),
            Err(err) => {
                tracing::warn!(%err, "duplex read failed");
                respond(&tx, rid, error_payload("unable to load object"));
            }
        }
    });
}

async fn update(
    state: &Arc<AppState>,
    client: &Mailbox,
    request: SockRequest,
    receiver: &mut SplitStream<WebSocket>,
    tx: &mpsc::Sender<Value>,
) {
    let Some(model) = Model::parse(request.model()) else {
        respond(tx, request.rid(), error_payload("invalid model type"));
        return;
    };
    let Some(body) = entity_body(state, client, &request, receiver, tx).await else {
        return;
    };
    let record = match Record::from_body(model, body) {
        Ok(record) => record,
        Err(_) => {
            respond(tx, request.rid(), error_payload("invalid entity body"));
            return;
        }
    };

    let state = state.clone();
    let client_id = client.id.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let rid = request.rid();

        // Bind identity from the request map, then gate on the stored
        // permission thread, never on one the body claims.
        let mut record = record;
        let allowed = match &mut record {
            Record::Mailbox(mailbox) => {
                if mailbox.id.is_empty() {
                    mailbox.id = request.get("id").unwrap_or("").to_string();
                }
                mailbox.id == client_id
            }
            Record::Thread(thread) => {
                if thread.id.is_empty() {
                    thread.id = request.get("id").unwrap_or("").to_string();
                }
                state.store.can_write(&client_id, &thread.id)
            }
            Record::Message(message) => {
                if message.id.is_empty() {
                    message.id = request.get("id").unwrap_or("").to_string();
                }
                match state.store.get_message(&message.id) {
                    Ok(stored) => {
                        message.thread_id = stored.thread_id;
                        state.store.can_write(&client_id, &message.thread_id)
                    }
                    Err(_) => {
                        respond(&tx, rid, error_payload("not found"));
                        return;
                    }
                }
            }
            Record::ThreadMember(member) => {
                if member.thread_id.is_empty() {
                    member.thread_id = request.get("thread_id").unwrap_or("").to_string();
                }
                if member.mailbox_id.is_empty() {
                    member.mailbox_id = request.get("mailbox_id").unwrap_or("").to_string();
                }
                state.store.can_write(&client_id, &member.thread_id)
            }
        };
        if !allowed {
            respond(&tx, rid, error_payload("access denied"));
            return;
        }

        match state.update_record(&mut record) {
            Ok(()) => respond(&tx, rid, record.to_value()),
            Err(StoreError::NotFound) => respond(&tx, rid, error_payload("not found")),
            Err(err) => {
                tracing::warn!(%err, "duplex update failed");
                respond(&tx, rid, error_payload("could not update object"));
            }
        }
    });
}

fn delete(state: &Arc<AppState>, client: &Mailbox, request: SockRequest, tx: &mpsc::Sender<Value>) {
    let Some(model) = Model::parse(request.model()) else {
        respond(tx, request.rid(), error_payload("invalid model type"));
        return;
    };

    let state = state.clone();
    let client_id = client.id.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let rid = request.rid();
        let record = match load_requested(&state, model, &request) {
            Ok(record) => record,
            Err(StoreError::NotFound) => {
                respond(&tx, rid, error_payload("not found"));
                return;
            }
            Err(err) => {
                tracing::warn!(%err, "duplex delete lookup failed");
                respond(&tx, rid, error_payload("unable to load object"));
                return;
            }
        };

        // Permission denial short-circuits before any mutation.
        let allowed = match &record {
            Record::Mailbox(mailbox) => mailbox.id == client_id,
            other => state.store.can_write(&client_id, other.permission_thread()),
        };
        if !allowed {
            respond(&tx, rid, error_payload("access denied"));
            return;
        }

        match state.delete_record(&record) {
            Ok(()) => respond(&tx, rid, record.to_value()),
            Err(err) => {
                tracing::warn!(%err, "duplex delete failed");
                respond(&tx, rid, error_payload("could not delete object"));
            }
        }
    });
}

fn list(state: &Arc<AppState>, client: &Mailbox, request: SockRequest, tx: &mpsc::Sender<Value>) {
    let model = request.model().to_string();
    match model.as_str() {
        "thread" => list_thread(state, client, request, tx),
        "threadmember" => list_members(state, client, request, tx),
        _ => respond(tx, request.rid(), error_payload("invalid model type")),
    }
}

/// Recent messages of a thread, optionally topic-filtered, optionally
/// continuing past `last_seq`; with `follow=true` the worker then forwards
/// every message-insert on the thread until the connection or the event
/// channel goes away.
fn list_thread(
    state: &Arc<AppState>,
    client: &Mailbox,
    request: SockRequest,
    tx: &mpsc::Sender<Value>,
) {
    let state = state.clone();
    let client_id = client.id.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let rid = request.rid();
        let key = request
            .get("id")
            .or_else(|| request.get("thread_id"))
            .unwrap_or("");

        let thread = match state.store.get_thread(key) {
            Ok(thread) => thread,
            Err(_) => {
                respond(&tx, rid, error_payload("thread not found"));
                return;
            }
        };
        if !state.store.can_read(&client_id, &thread.id) {
            respond(&tx, rid, error_payload("access denied"));
            return;
        }

        let follow = request.flag("follow") && state.store.can_follow(&client_id, &thread.id);
        // Attach before the query so an insert cannot fall into the gap;
        // at-least-once tolerates the overlap.
        let events = if follow {
            Some(
                state
                    .stream
                    .event_channel(&format!("message-insert-{}", thread.id))
                    .await,
            )
        } else {
            None
        };

        let topic = request.get("topic").unwrap_or("");
        let limit = request.int("limit").unwrap_or(DEFAULT_LIST_LIMIT);
        let result = match request.int("last_seq") {
            Some(last_seq) => state.store.messages_since(&thread.id, last_seq, topic, limit),
            None => state
                .store
                .recent_messages_with_topic(&thread.id, topic, limit),
        };
        let messages = match result {
            Ok(messages) => messages,
            Err(err) => {
                tracing::warn!(%err, thread = %thread.id, "recent message query failed");
                respond(&tx, rid, error_payload("error retrieving recent messages"));
                return;
            }
        };
        respond(
            &tx,
            rid,
            serde_json::to_value(&messages).unwrap_or(Value::Null),
        );

        if let Some(mut events) = events {
            // Two exits: the event channel closes when the fan-out drops a
            // slow subscriber, and the send fails once the response queue
            // is torn down with the connection.
            while let Some(event) = events.recv().await {
                let payload = serde_json::to_value(vec![event]).unwrap_or(Value::Null);
                if tx.send(payload).await.is_err() {
                    return;
                }
            }
        }
    });
}

/// Members of a thread by `thread_id`, or (holder only) the mailbox's
/// recently-updated threads by `mailbox_id`.
fn list_members(
    state: &Arc<AppState>,
    client: &Mailbox,
    request: SockRequest,
    tx: &mpsc::Sender<Value>,
) {
    let state = state.clone();
    let client_id = client.id.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let rid = request.rid();

        if let Some(thread_id) = request.get("thread_id") {
            let thread = match state.store.get_thread(thread_id) {
                Ok(thread) => thread,
                Err(_) => {
                    respond(&tx, rid, error_payload("thread not found"));
                    return;
                }
            };
            if !state.store.can_read(&client_id, &thread.id) {
                respond(&tx, rid, error_payload("access denied"));
                return;
            }
            match state.store.get_all_members(&thread.id) {
                Ok(members) => respond(
                    &tx,
                    rid,
                    serde_json::to_value(&members).unwrap_or(Value::Null),
                ),
                Err(err) => {
                    tracing::warn!(%err, "member list failed");
                    respond(&tx, rid, error_payload("unable to get members for thread"));
                }
            }
        } else if let Some(mailbox_id) = request.get("mailbox_id") {
            if mailbox_id != client_id {
                respond(&tx, rid, error_payload("access denied"));
                return;
            }
            let since = request.int("since").unwrap_or(0);
            let limit = request.int("limit").unwrap_or(DEFAULT_LIST_LIMIT);
            let offset = request.int("offset").unwrap_or(0);
            match state.store.recent_threads(mailbox_id, since, limit, offset) {
                Ok(threads) => respond(
                    &tx,
                    rid,
                    serde_json::to_value(&threads).unwrap_or(Value::Null),
                ),
                Err(err) => {
                    tracing::warn!(%err, "recent thread list failed");
                    respond(&tx, rid, error_payload("unable to get threads for mailbox"));
                }
            }
        } else {
            respond(&tx, rid, error_payload("thread_id or mailbox_id required"));
        }
    });
}

/// Load the record a request addresses: `id` for singleton entities,
/// `thread_id` + `mailbox_id` for members.
fn load_requested(
    state: &AppState,
    model: Model,
    request: &SockRequest,
) -> Result<Record, StoreError> {
    let key = match model {
        Model::ThreadMember => RecordKey::Member {
            thread_id: request.get("thread_id").unwrap_or(""),
            mailbox_id: request.get("mailbox_id").unwrap_or(""),
        },
        _ => RecordKey::Id(request.get("id").unwrap_or("")),
    };
    state.load_record(model, key)
}
