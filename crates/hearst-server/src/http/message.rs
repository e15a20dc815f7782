use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

use hearst_store::Message;

use crate::http::{authorized_mailbox, ApiError};
use crate::records::Record;
use crate::state::AppState;

const DEFAULT_HISTORY_LIMIT: i64 = 500;

/// GET /messages/{thread_id}?topic=&limit=&last_seq=: recent history, or
/// a gap-free ascending page when `last_seq` is given.
pub async fn index(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Message>>, ApiError> {
    let client = authorized_mailbox(&state, &headers, &query)?;
    let thread = state.store.get_thread(&thread_id)?;
    if !state.store.can_read(&client.id, &thread.id) {
        return Err(ApiError::Forbidden);
    }

    let topic = query.get("topic").map(String::as_str).unwrap_or("");
    let limit = query
        .get("limit")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(DEFAULT_HISTORY_LIMIT);

    let messages = match query.get("last_seq").and_then(|raw| raw.parse().ok()) {
        Some(last_seq) => state
            .store
            .messages_since(&thread.id, last_seq, topic, limit)?,
        None => state
            .store
            .recent_messages_with_topic(&thread.id, topic, limit)?,
    };
    Ok(Json(messages))
}

/// POST /messages/{thread_id}: insert, then answer with the thread's
/// recent history reflecting the new row.
pub async fn create(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Json<Message>, JsonRejection>,
) -> Result<(StatusCode, Json<Vec<Message>>), ApiError> {
    let client = authorized_mailbox(&state, &headers, &query)?;
    let Json(mut message) = body.map_err(|err| ApiError::Malformed(err.to_string()))?;

    let thread = state.store.get_thread(&thread_id)?;
    if !state.store.can_write(&client.id, &thread.id) {
        return Err(ApiError::Forbidden);
    }

    message.thread_id = thread.id.clone();
    if message.sender_mailbox_id.is_empty() {
        message.sender_mailbox_id = client.id;
    }

    let mut record = Record::Message(message);
    state.insert_record(&mut record, None)?;

    let history = state
        .store
        .recent_messages(&thread.id, DEFAULT_HISTORY_LIMIT)?;
    Ok((StatusCode::CREATED, Json(history)))
}
