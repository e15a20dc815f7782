use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::error::{not_found, StoreError};
use crate::thread::Thread;
use crate::{new_uuid, now_ms, Store};

/// A device identity bound to an asymmetric keypair.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Mailbox {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    /// Last liveness tick observed on a duplex connection.
    #[serde(default)]
    pub connected_at: i64,
    #[serde(default)]
    pub public_key: String,
    /// Opaque push token, when the device has one.
    #[serde(default)]
    pub device_id: Option<String>,
}

impl Mailbox {
    /// Ensure the mailbox has an id, generating one if absent.
    pub fn require_id(&mut self) -> &str {
        if self.id.is_empty() {
            self.id = new_uuid();
        }
        &self.id
    }
}

fn mailbox_from_row(row: &Row) -> rusqlite::Result<Mailbox> {
    Ok(Mailbox {
        id: row.get(0)?,
        created_at: row.get(1)?,
        updated_at: row.get(2)?,
        connected_at: row.get(3)?,
        public_key: row.get(4)?,
        device_id: row.get(5)?,
    })
}

const MAILBOX_COLS: &str = "id, created_at, updated_at, connected_at, public_key, device_id";

impl Store {
    pub fn insert_mailbox(&self, mailbox: &mut Mailbox) -> Result<(), StoreError> {
        mailbox.require_id();
        let now = now_ms();
        mailbox.created_at = now;
        mailbox.updated_at = now;
        mailbox.connected_at = now;

        self.conn().execute(
            "INSERT INTO mailboxes (id, created_at, updated_at, connected_at, public_key, device_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                mailbox.id,
                mailbox.created_at,
                mailbox.updated_at,
                mailbox.connected_at,
                mailbox.public_key,
                mailbox.device_id,
            ],
        )?;
        Ok(())
    }

    pub fn get_mailbox(&self, id: &str) -> Result<Mailbox, StoreError> {
        self.conn()
            .query_row(
                &format!("SELECT {MAILBOX_COLS} FROM mailboxes WHERE id = ?1"),
                params![id],
                mailbox_from_row,
            )
            .map_err(not_found)
    }

    /// Update a mailbox. Blank `public_key` and absent `device_id` preserve
    /// the stored values so partial client payloads don't wipe credentials.
    pub fn update_mailbox(&self, mailbox: &mut Mailbox) -> Result<(), StoreError> {
        let existing = self.get_mailbox(&mailbox.id)?;
        if mailbox.public_key.is_empty() {
            mailbox.public_key = existing.public_key;
        }
        if mailbox.device_id.is_none() {
            mailbox.device_id = existing.device_id;
        }
        mailbox.created_at = existing.created_at;

        let now = now_ms();
        mailbox.updated_at = now;
        mailbox.connected_at = now;

        self.conn().execute(
            "UPDATE mailboxes SET updated_at = ?2, connected_at = ?3, public_key = ?4, device_id = ?5
             WHERE id = ?1",
            params![
                mailbox.id,
                mailbox.updated_at,
                mailbox.connected_at,
                mailbox.public_key,
                mailbox.device_id,
            ],
        )?;
        Ok(())
    }

    /// Record a liveness tick for the mailbox. Missing rows are ignored;
    /// liveness must never fail a connection.
    pub fn touch_mailbox(&self, id: &str) {
        let result = self.conn().execute(
            "UPDATE mailboxes SET connected_at = ?2 WHERE id = ?1",
            params![id, now_ms()],
        );
        if let Err(err) = result {
            tracing::warn!(mailbox = id, %err, "failed to record liveness tick");
        }
    }

    pub fn delete_mailbox(&self, id: &str) -> Result<(), StoreError> {
        let affected = self
            .conn()
            .execute("DELETE FROM mailboxes WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Threads the mailbox belongs to with `updated_at > since`, most
    /// recently updated first. Backs inbox views and reconnect catch-up.
    pub fn recent_threads(
        &self,
        mailbox_id: &str,
        since_ms: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Thread>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT t.id, t.created_at, t.updated_at, t.subject, t.identifier, t.domain
             FROM threads t
             JOIN thread_members m ON m.thread_id = t.id
             WHERE m.mailbox_id = ?1 AND t.updated_at > ?2
             ORDER BY t.updated_at DESC
             LIMIT ?3 OFFSET ?4",
        )?;
        let rows = stmt.query_map(
            params![mailbox_id, since_ms, limit, offset],
            crate::thread::thread_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
