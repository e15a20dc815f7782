use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::Value;

use hearst_auth::Keypair;
use hearst_store::Mailbox;

use crate::http::{authorized_mailbox, ApiError};
use crate::records::{Model, Record, RecordKey};
use crate::state::AppState;

/// Response headers carrying first-run credentials when the server mints
/// the keypair on the client's behalf.
pub const MAILBOX_KEY_HEADER: &str = "x-hearst-mailbox-key";
pub const SESSION_TOKEN_HEADER: &str = "x-hearst-session-token";

/// POST /mailbox/: client self-registration; the one unauthenticated
/// write. A blank public key asks the server to mint a keypair; the private
/// half and a ready 24-hour session come back in response headers.
pub async fn create(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Mailbox>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(mut mailbox) = body.map_err(|err| ApiError::Malformed(err.to_string()))?;

    let mut headers = HeaderMap::new();
    if mailbox.public_key.is_empty() {
        let keypair = Keypair::generate();
        mailbox.public_key = keypair.public_armored();
        if let Ok(value) = HeaderValue::from_str(&keypair.private_armored()) {
            headers.insert(HeaderName::from_static(MAILBOX_KEY_HEADER), value);
        }
        if let Ok(value) = HeaderValue::from_str(&state.mint_session(&keypair)) {
            headers.insert(HeaderName::from_static(SESSION_TOKEN_HEADER), value);
        }
    }

    let mut record = Record::Mailbox(mailbox);
    state.insert_record(&mut record, None)?;
    Ok((StatusCode::CREATED, headers, Json(record.to_value())))
}

/// GET /mailbox/{id}
pub async fn show(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorized_mailbox(&state, &headers, &query)?;
    let record = state.load_record(Model::Mailbox, RecordKey::Id(&id))?;
    Ok(Json(record.to_value()))
}

/// PUT /mailbox/{id}. Only the holder may change its own mailbox.
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Json<Mailbox>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let client = authorized_mailbox(&state, &headers, &query)?;
    let Json(mut mailbox) = body.map_err(|err| ApiError::Malformed(err.to_string()))?;

    if mailbox.id.is_empty() {
        mailbox.id = id;
    }
    if client.id != mailbox.id {
        return Err(ApiError::Forbidden);
    }

    let mut record = Record::Mailbox(mailbox);
    state.update_record(&mut record)?;
    Ok(Json(record.to_value()))
}

/// DELETE /mailbox/{id}. Holder only; echoes the pre-delete snapshot.
pub async fn destroy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let client = authorized_mailbox(&state, &headers, &query)?;
    if client.id != id {
        return Err(ApiError::Forbidden);
    }

    let record = state.load_record(Model::Mailbox, RecordKey::Id(&id))?;
    state.delete_record(&record)?;
    Ok(Json(record.to_value()))
}
