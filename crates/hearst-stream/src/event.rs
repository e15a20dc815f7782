use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every bus channel name starts with this, so a pattern subscription can
/// zoom from "everything" down to one action on one object.
pub const EVENT_PREFIX: &str = "notification-";

/// A model change announced on the bus.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Event {
    /// What kind of object changed.
    pub model: String,
    /// insert, update, delete, or notification.
    pub action: String,
    pub object_id: String,
    pub payload: Value,
}

impl Event {
    /// Recover an event from a raw channel name and serialized payload.
    /// Object ids contain the separator themselves, so everything past the
    /// action token is rejoined.
    pub fn parse(channel: &str, payload: &str) -> Event {
        let comps: Vec<&str> = channel.split('-').collect();
        let mut event = Event {
            model: String::new(),
            action: String::new(),
            object_id: String::new(),
            payload: serde_json::from_str(payload)
                .unwrap_or_else(|_| Value::String(payload.to_string())),
        };
        if comps.len() > 1 {
            event.model = comps[1].to_string();
        }
        if comps.len() > 2 {
            event.action = comps[2].to_string();
            event.object_id = comps[3..].join("-");
        }
        event
    }
}

/// Full channel name for an event id like `message-insert-<thread>`.
pub fn channel_name(event_id: &str) -> String {
    format!("{EVENT_PREFIX}{event_id}")
}

/// Wildcarded subscription pattern for a prefix.
pub fn pattern_for(prefix: &str) -> String {
    format!("{EVENT_PREFIX}{prefix}*")
}

pub(crate) fn pattern_matches(pattern: &str, channel: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(stem) => channel.starts_with(stem),
        None => channel == pattern,
    }
}
