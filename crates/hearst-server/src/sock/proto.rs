use std::collections::HashMap;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// A duplex request: a flat string-keyed map carrying at minimum `action`
/// and `model`, plus whatever identifies the object (`id`, or
/// `thread_id` + `mailbox_id` for members).
#[derive(Debug, Clone, Default)]
pub struct SockRequest {
    fields: HashMap<String, String>,
}

impl SockRequest {
    pub fn parse(text: &str) -> Option<SockRequest> {
        serde_json::from_str(text)
            .ok()
            .map(|fields| Self { fields })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn action(&self) -> &str {
        self.get("action").unwrap_or("")
    }

    pub fn model(&self) -> &str {
        self.get("model").unwrap_or("")
    }

    /// The request-correlation id, when the client wants one echoed.
    pub fn rid(&self) -> Option<&str> {
        self.get("rid").filter(|rid| !rid.is_empty())
    }

    pub fn flag(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|raw| raw.parse().ok())
    }
}

/// Wrap a payload in `{rid, payload}` when the request carried a rid;
/// otherwise the payload travels bare.
pub fn envelope(rid: Option<&str>, payload: Value) -> Value {
    match rid {
        Some(rid) => json!({ "rid": rid, "payload": payload }),
        None => payload,
    }
}

pub fn error_payload(message: &str) -> Value {
    json!({ "error": message })
}

/// Non-blocking enqueue onto the bounded response queue. A full queue gets
/// a best-effort backpressure error instead of wedging the caller; a closed
/// queue means the connection is gone and the payload is dropped.
pub fn respond(tx: &mpsc::Sender<Value>, rid: Option<&str>, payload: Value) {
    match tx.try_send(envelope(rid, payload)) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            tracing::warn!("response queue full; answering with backpressure error");
            let _ = tx.try_send(envelope(rid, error_payload("backpressure")));
        }
        Err(TrySendError::Closed(_)) => {}
    }
}
