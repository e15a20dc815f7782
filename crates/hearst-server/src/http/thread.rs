use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::Value;

use hearst_store::{Thread, ThreadMember};

use crate::http::{authorized_mailbox, ApiError};
use crate::records::{Model, Record, RecordKey};
use crate::state::AppState;

/// POST /thread/: any authenticated client may open a thread; the creator
/// is granted the all-true membership in the same transaction.
pub async fn create(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Json<Thread>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let client = authorized_mailbox(&state, &headers, &query)?;
    let Json(thread) = body.map_err(|err| ApiError::Malformed(err.to_string()))?;

    let mut record = Record::Thread(thread);
    state.insert_record(&mut record, Some(&client.id))?;
    Ok((StatusCode::CREATED, Json(record.to_value())))
}

/// GET /thread/{id}, by id or identifier handle.
pub async fn show(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let client = authorized_mailbox(&state, &headers, &query)?;
    let thread = state.store.get_thread(&id)?;
    if !state.store.can_read(&client.id, &thread.id) {
        return Err(ApiError::Forbidden);
    }
    Ok(Json(Record::Thread(thread).to_value()))
}

/// PUT /thread/{id}
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Json<Thread>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let client = authorized_mailbox(&state, &headers, &query)?;
    let Json(mut thread) = body.map_err(|err| ApiError::Malformed(err.to_string()))?;

    let existing = state.store.get_thread(&id)?;
    if !state.store.can_write(&client.id, &existing.id) {
        return Err(ApiError::Forbidden);
    }

    thread.id = existing.id;
    let mut record = Record::Thread(thread);
    state.update_record(&mut record)?;
    Ok(Json(record.to_value()))
}

/// DELETE /thread/{id}. Permission denial short-circuits before any
/// mutation; the response is the pre-delete snapshot.
pub async fn destroy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let client = authorized_mailbox(&state, &headers, &query)?;
    let existing = state.store.get_thread(&id)?;
    if !state.store.can_write(&client.id, &existing.id) {
        return Err(ApiError::Forbidden);
    }

    let record = Record::Thread(existing);
    state.delete_record(&record)?;
    Ok(Json(record.to_value()))
}

/// GET /thread/{id}/members
pub async fn list_members(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ThreadMember>>, ApiError> {
    let client = authorized_mailbox(&state, &headers, &query)?;
    let thread = state.store.get_thread(&id)?;
    if !state.store.can_read(&client.id, &thread.id) {
        return Err(ApiError::Forbidden);
    }
    Ok(Json(state.store.get_all_members(&thread.id)?))
}

/// POST /thread/{id}/members
pub async fn add_member(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Json<ThreadMember>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let client = authorized_mailbox(&state, &headers, &query)?;
    let Json(mut member) = body.map_err(|err| ApiError::Malformed(err.to_string()))?;

    let thread = state.store.get_thread(&id)?;
    if !state.store.can_write(&client.id, &thread.id) {
        return Err(ApiError::Forbidden);
    }

    member.thread_id = thread.id;
    let mut record = Record::ThreadMember(member);
    state.insert_record(&mut record, None)?;
    Ok((StatusCode::CREATED, Json(record.to_value())))
}

/// GET /thread/{id}/members/{mailbox_id}
pub async fn show_member(
    State(state): State<Arc<AppState>>,
    Path((id, mailbox_id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let client = authorized_mailbox(&state, &headers, &query)?;
    let thread = state.store.get_thread(&id)?;
    if !state.store.can_read(&client.id, &thread.id) {
        return Err(ApiError::Forbidden);
    }

    let record = state.load_record(
        Model::ThreadMember,
        RecordKey::Member {
            thread_id: &thread.id,
            mailbox_id: &mailbox_id,
        },
    )?;
    Ok(Json(record.to_value()))
}

/// PUT /thread/{id}/members/{mailbox_id}
pub async fn update_member(
    State(state): State<Arc<AppState>>,
    Path((id, mailbox_id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Json<ThreadMember>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let client = authorized_mailbox(&state, &headers, &query)?;
    let Json(mut member) = body.map_err(|err| ApiError::Malformed(err.to_string()))?;

    let thread = state.store.get_thread(&id)?;
    if !state.store.can_write(&client.id, &thread.id) {
        return Err(ApiError::Forbidden);
    }

    member.thread_id = thread.id;
    member.mailbox_id = mailbox_id;
    let mut record = Record::ThreadMember(member);
    state.update_record(&mut record)?;
    Ok(Json(record.to_value()))
}

/// DELETE /thread/{id}/members/{mailbox_id}. Denial short-circuits.
pub async fn remove_member(
    State(state): State<Arc<AppState>>,
    Path((id, mailbox_id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let client = authorized_mailbox(&state, &headers, &query)?;
    let thread = state.store.get_thread(&id)?;
    if !state.store.can_write(&client.id, &thread.id) {
        return Err(ApiError::Forbidden);
    }

    let record = state.load_record(
        Model::ThreadMember,
        RecordKey::Member {
            thread_id: &thread.id,
            mailbox_id: &mailbox_id,
        },
    )?;
    state.delete_record(&record)?;
    Ok(Json(record.to_value()))
}
