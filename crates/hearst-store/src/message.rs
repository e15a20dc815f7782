use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{not_found, StoreError};
use crate::{new_uuid, now_ms, Store};

/// An ordered entry in a thread's log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub sender_mailbox_id: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub expires_at: Option<i64>,
    /// Text tag, filterable with SQL LIKE patterns.
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub body: String,
    /// Opaque structured documents supplied by the client.
    #[serde(default)]
    pub labels: Value,
    #[serde(default)]
    pub payload: Value,
    /// The thread's sequence number at insert time. Strictly increasing
    /// within a thread; zero on rows from before the backfill.
    #[serde(default)]
    pub index: i64,
}

impl Message {
    pub fn require_id(&mut self) -> &str {
        if self.id.is_empty() {
            self.id = new_uuid();
        }
        &self.id
    }

    /// Apply the unquoting contract to both document fields.
    pub fn unquote_json(&mut self) {
        self.labels = unquote(std::mem::take(&mut self.labels));
        self.payload = unquote(std::mem::take(&mut self.payload));
    }
}

/// Clients sometimes double-encode document fields. If the value is a JSON
/// string whose content is itself a JSON document, unwrap one level of
/// quoting; anything else is stored verbatim.
fn unquote(value: Value) -> Value {
    if let Value::String(inner) = &value {
        if let Ok(parsed) = serde_json::from_str::<Value>(inner) {
            return parsed;
        }
    }
    value
}

fn message_from_row(row: &Row) -> rusqlite::Result<Message> {
    let labels: String = row.get(7)?;
    let payload: String = row.get(8)?;
    Ok(Message {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        sender_mailbox_id: row.get(2)?,
        created_at: row.get(3)?,
        expires_at: row.get(4)?,
        topic: row.get(5)?,
        body: row.get(6)?,
        labels: serde_json::from_str(&labels).unwrap_or(Value::Null),
        payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
        index: row.get(9)?,
    })
}

const MESSAGE_COLS: &str = "id, thread_id, sender_mailbox_id, created_at, expires_at, \
                            topic, body, labels, payload, \"index\"";

fn effective_filter(topic_filter: &str) -> &str {
    if topic_filter.is_empty() {
        "%"
    } else {
        topic_filter
    }
}

impl Store {
    /// Insert a message. One transaction allocates the next value of the
    /// thread's counter as the message `index`, writes the row, and bumps
    /// the thread's `updated_at`; all of it commits or none of it does.
    pub fn insert_message(&self, message: &mut Message) -> Result<(), StoreError> {
        if message.thread_id.is_empty() {
            return Err(StoreError::InvalidInput("message has no thread id"));
        }
        message.require_id();
        message.unquote_json();
        let now = now_ms();
        message.created_at = now;

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let bumped = tx.execute(
            "UPDATE thread_counters SET value = value + 1 WHERE thread_id = ?1",
            params![message.thread_id],
        )?;
        if bumped == 0 {
            return Err(StoreError::NotFound);
        }
        let index: i64 = tx.query_row(
            "SELECT value FROM thread_counters WHERE thread_id = ?1",
            params![message.thread_id],
            |row| row.get(0),
        )?;

        tx.execute(
            &format!(
                "INSERT INTO messages ({MESSAGE_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                message.id,
                message.thread_id,
                message.sender_mailbox_id,
                message.created_at,
                message.expires_at,
                message.topic,
                message.body,
                message.labels.to_string(),
                message.payload.to_string(),
                index,
            ],
        )?;
        tx.execute(
            "UPDATE threads SET updated_at = ?2 WHERE id = ?1",
            params![message.thread_id, now],
        )?;
        tx.commit()?;

        message.index = index;
        Ok(())
    }

    pub fn get_message(&self, id: &str) -> Result<Message, StoreError> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1"),
                params![id],
                message_from_row,
            )
            .map_err(not_found)
    }

    /// Update a message's mutable fields. The index and thread binding are
    /// immutable once allocated.
    pub fn update_message(&self, message: &mut Message) -> Result<(), StoreError> {
        message.unquote_json();
        let affected = self.conn().execute(
            "UPDATE messages SET expires_at = ?2, topic = ?3, body = ?4,
             labels = ?5, payload = ?6 WHERE id = ?1",
            params![
                message.id,
                message.expires_at,
                message.topic,
                message.body,
                message.labels.to_string(),
                message.payload.to_string(),
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        *message = self.get_message(&message.id)?;
        Ok(())
    }

    pub fn delete_message(&self, id: &str) -> Result<(), StoreError> {
        let affected = self
            .conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// The last `limit` messages of the thread, ascending by index.
    pub fn recent_messages(&self, thread_id: &str, limit: i64) -> Result<Vec<Message>, StoreError> {
        self.recent_messages_with_topic(thread_id, "", limit)
    }

    /// The last `limit` messages whose topic matches the LIKE filter,
    /// ascending by index. An empty filter matches everything.
    pub fn recent_messages_with_topic(
        &self,
        thread_id: &str,
        topic_filter: &str,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM (
                 SELECT {MESSAGE_COLS} FROM messages
                 WHERE thread_id = ?1 AND topic LIKE ?2
                 ORDER BY \"index\" DESC LIMIT ?3
             ) ORDER BY \"index\" ASC"
        ))?;
        let rows = stmt.query_map(
            params![thread_id, effective_filter(topic_filter), limit],
            message_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Gap-free catch-up: the ascending page of messages with
    /// `index > last_seq`, topic-filtered.
    pub fn messages_since(
        &self,
        thread_id: &str,
        last_seq: i64,
        topic_filter: &str,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM messages
             WHERE thread_id = ?1 AND \"index\" > ?2 AND topic LIKE ?3
             ORDER BY \"index\" ASC LIMIT ?4"
        ))?;
        let rows = stmt.query_map(
            params![thread_id, last_seq, effective_filter(topic_filter), limit],
            message_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
