pub mod error;
pub mod mailbox;
pub mod message;
pub mod permissions;
pub mod thread;

pub use error::StoreError;
pub use mailbox::Mailbox;
pub use message::Message;
pub use thread::{Thread, ThreadMember};

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

/// Milliseconds since the Unix epoch. All entity timestamps use this clock.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Fresh textual UUID for a new record.
pub fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS mailboxes (
    id           TEXT PRIMARY KEY NOT NULL,
    created_at   INTEGER NOT NULL,
    updated_at   INTEGER NOT NULL,
    connected_at INTEGER NOT NULL,
    public_key   TEXT NOT NULL,
    device_id    TEXT
);
CREATE INDEX IF NOT EXISTS mailboxes_updated ON mailboxes(updated_at);

CREATE TABLE IF NOT EXISTS threads (
    id         TEXT PRIMARY KEY NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    subject    TEXT NOT NULL DEFAULT '',
    identifier TEXT NOT NULL UNIQUE,
    domain     TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS threads_updated ON threads(updated_at);

CREATE TABLE IF NOT EXISTS thread_members (
    thread_id          TEXT NOT NULL,
    mailbox_id         TEXT NOT NULL,
    allow_read         INTEGER NOT NULL DEFAULT 0,
    allow_write        INTEGER NOT NULL DEFAULT 0,
    allow_notification INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (thread_id, mailbox_id)
);
CREATE INDEX IF NOT EXISTS thread_members_mailbox ON thread_members(mailbox_id);

CREATE TABLE IF NOT EXISTS messages (
    id                TEXT PRIMARY KEY NOT NULL,
    thread_id         TEXT NOT NULL,
    sender_mailbox_id TEXT NOT NULL DEFAULT '',
    created_at        INTEGER NOT NULL,
    expires_at        INTEGER,
    topic             TEXT NOT NULL DEFAULT '',
    body              TEXT NOT NULL DEFAULT '',
    labels            TEXT NOT NULL DEFAULT 'null',
    payload           TEXT NOT NULL DEFAULT 'null',
    "index"           INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS messages_thread_index ON messages(thread_id, "index");

CREATE TABLE IF NOT EXISTS thread_counters (
    thread_id TEXT PRIMARY KEY NOT NULL,
    value     INTEGER NOT NULL DEFAULT 0
);
"#;

/// Durable record store. Owns the SQLite connection; every multi-step
/// operation runs inside an explicit transaction.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (creating if needed) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory store, used by tests and throwaway deployments.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("store mutex poisoned")
    }
}
