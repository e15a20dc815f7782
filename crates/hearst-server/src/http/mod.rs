pub mod auth;
pub mod error;
pub mod mailbox;
pub mod message;
pub mod thread;

pub use error::ApiError;

use std::collections::HashMap;

use axum::http::HeaderMap;
use hearst_auth::{public_from_armored, Session};
use hearst_store::Mailbox;

use crate::state::AppState;

pub const MAILBOX_HEADER: &str = "x-hearst-mailbox";
pub const SESSION_HEADER: &str = "x-hearst-session";

/// Resolve the authenticated mailbox for a request: the mailbox id and the
/// encoded session envelope arrive in the `X-Hearst-Mailbox` /
/// `X-Hearst-Session` headers or their query-string equivalents.
pub fn authorized_mailbox(
    state: &AppState,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Result<Mailbox, ApiError> {
    let mailbox_id = header_or_query(headers, query, MAILBOX_HEADER, "mailbox")
        .ok_or(ApiError::Unauthenticated)?;
    let session_token = header_or_query(headers, query, SESSION_HEADER, "session")
        .ok_or(ApiError::Unauthenticated)?;

    let mailbox = state
        .store
        .get_mailbox(&mailbox_id)
        .map_err(|_| ApiError::Unauthenticated)?;
    let client_key =
        public_from_armored(&mailbox.public_key).map_err(|_| ApiError::Unauthenticated)?;

    let session = Session::parse(&session_token)?;
    session.validate(&client_key, &state.server_key.public_key())?;
    Ok(mailbox)
}

fn header_or_query(
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    header: &str,
    param: &str,
) -> Option<String> {
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| query.get(param).cloned())
}
