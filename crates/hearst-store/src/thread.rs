use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::error::{not_found, StoreError};
use crate::{new_uuid, now_ms, Store};

/// A named conversation owning a monotonically-indexed message log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Thread {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub subject: String,
    /// Globally-unique human-readable handle; defaults to the UUID.
    #[serde(default)]
    pub identifier: String,
    /// The domain of the server that owns this thread.
    #[serde(default)]
    pub domain: String,
}

impl Thread {
    pub fn require_id(&mut self) -> &str {
        if self.id.is_empty() {
            self.id = new_uuid();
        }
        &self.id
    }

    /// Fill the id and identifier so the thread is insertable.
    pub fn fill_missing(&mut self) {
        self.require_id();
        if self.identifier.is_empty() {
            self.identifier = self.id.clone();
        }
    }
}

/// The permission edge between a mailbox and a thread.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ThreadMember {
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub mailbox_id: String,
    #[serde(default)]
    pub allow_read: bool,
    #[serde(default)]
    pub allow_write: bool,
    #[serde(default)]
    pub allow_notification: bool,
}

impl ThreadMember {
    /// The all-true membership granted to a thread's creator.
    pub fn admin(thread_id: impl Into<String>, mailbox_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            mailbox_id: mailbox_id.into(),
            allow_read: true,
            allow_write: true,
            allow_notification: true,
        }
    }
}

pub(crate) fn thread_from_row(row: &Row) -> rusqlite::Result<Thread> {
    Ok(Thread {
        id: row.get(0)?,
        created_at: row.get(1)?,
        updated_at: row.get(2)?,
        subject: row.get(3)?,
        identifier: row.get(4)?,
        domain: row.get(5)?,
    })
}

fn member_from_row(row: &Row) -> rusqlite::Result<ThreadMember> {
    Ok(ThreadMember {
        thread_id: row.get(0)?,
        mailbox_id: row.get(1)?,
        allow_read: row.get(2)?,
        allow_write: row.get(3)?,
        allow_notification: row.get(4)?,
    })
}

const THREAD_COLS: &str = "id, created_at, updated_at, subject, identifier, domain";
const MEMBER_COLS: &str = "thread_id, mailbox_id, allow_read, allow_write, allow_notification";

impl Store {
    /// Insert a thread. The row, the thread's dedicated counter, and (when
    /// `admin` is given) the creator's all-true member row land in a single
    /// transaction.
    pub fn insert_thread(
        &self,
        thread: &mut Thread,
        admin: Option<&str>,
    ) -> Result<(), StoreError> {
        thread.fill_missing();
        let now = now_ms();
        thread.created_at = now;
        thread.updated_at = now;

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO threads (id, created_at, updated_at, subject, identifier, domain)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                thread.id,
                thread.created_at,
                thread.updated_at,
                thread.subject,
                thread.identifier,
                thread.domain,
            ],
        )?;
        tx.execute(
            "INSERT INTO thread_counters (thread_id, value) VALUES (?1, 0)",
            params![thread.id],
        )?;
        if let Some(mailbox_id) = admin {
            let member = ThreadMember::admin(&thread.id, mailbox_id);
            insert_member(&tx, &member)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Load a thread by id, falling back to its identifier handle.
    pub fn get_thread(&self, id_or_identifier: &str) -> Result<Thread, StoreError> {
        let conn = self.conn();
        let by_id = conn.query_row(
            &format!("SELECT {THREAD_COLS} FROM threads WHERE id = ?1"),
            params![id_or_identifier],
            thread_from_row,
        );
        match by_id {
            Ok(thread) => Ok(thread),
            Err(rusqlite::Error::QueryReturnedNoRows) => conn
                .query_row(
                    &format!("SELECT {THREAD_COLS} FROM threads WHERE identifier = ?1"),
                    params![id_or_identifier],
                    thread_from_row,
                )
                .map_err(not_found),
            Err(err) => Err(err.into()),
        }
    }

    /// Update a thread. Blank subject/identifier/domain preserve the stored
    /// values; `updated_at` is bumped.
    pub fn update_thread(&self, thread: &mut Thread) -> Result<(), StoreError> {
        let existing = self.get_thread(&thread.id)?;
        if thread.subject.is_empty() {
            thread.subject = existing.subject;
        }
        if thread.identifier.is_empty() {
            thread.identifier = existing.identifier;
        }
        if thread.domain.is_empty() {
            thread.domain = existing.domain;
        }
        thread.created_at = existing.created_at;
        thread.updated_at = now_ms();

        self.conn().execute(
            "UPDATE threads SET updated_at = ?2, subject = ?3, identifier = ?4, domain = ?5
             WHERE id = ?1",
            params![
                thread.id,
                thread.updated_at,
                thread.subject,
                thread.identifier,
                thread.domain,
            ],
        )?;
        Ok(())
    }

    /// Delete a thread together with its counter, members, and messages.
    pub fn delete_thread(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let affected = tx.execute("DELETE FROM threads WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        tx.execute("DELETE FROM thread_members WHERE thread_id = ?1", params![id])?;
        tx.execute("DELETE FROM messages WHERE thread_id = ?1", params![id])?;
        tx.execute("DELETE FROM thread_counters WHERE thread_id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_member(
        &self,
        thread_id: &str,
        mailbox_id: &str,
    ) -> Result<ThreadMember, StoreError> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {MEMBER_COLS} FROM thread_members
                     WHERE thread_id = ?1 AND mailbox_id = ?2"
                ),
                params![thread_id, mailbox_id],
                member_from_row,
            )
            .map_err(not_found)
    }

    pub fn get_all_members(&self, thread_id: &str) -> Result<Vec<ThreadMember>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMBER_COLS} FROM thread_members WHERE thread_id = ?1
             ORDER BY mailbox_id"
        ))?;
        let rows = stmt.query_map(params![thread_id], member_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Add a member edge. The mailbox must already exist.
    pub fn add_member(&self, member: &ThreadMember) -> Result<(), StoreError> {
        if member.thread_id.is_empty() {
            return Err(StoreError::InvalidInput("member has no thread id"));
        }
        if member.mailbox_id.is_empty() {
            return Err(StoreError::InvalidInput("member has no mailbox id"));
        }

        let conn = self.conn();
        let mailbox_exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM mailboxes WHERE id = ?1)",
                params![member.mailbox_id],
                |row| row.get(0),
            )?;
        if !mailbox_exists {
            return Err(StoreError::NotFound);
        }

        insert_member(&conn, member)?;
        Ok(())
    }

    pub fn update_member(&self, member: &ThreadMember) -> Result<(), StoreError> {
        let affected = self.conn().execute(
            "UPDATE thread_members
             SET allow_read = ?3, allow_write = ?4, allow_notification = ?5
             WHERE thread_id = ?1 AND mailbox_id = ?2",
            params![
                member.thread_id,
                member.mailbox_id,
                member.allow_read,
                member.allow_write,
                member.allow_notification,
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn remove_member(&self, thread_id: &str, mailbox_id: &str) -> Result<(), StoreError> {
        let affected = self.conn().execute(
            "DELETE FROM thread_members WHERE thread_id = ?1 AND mailbox_id = ?2",
            params![thread_id, mailbox_id],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Members of the thread that asked to be notified of new messages.
    pub fn members_to_notify(&self, thread_id: &str) -> Result<Vec<ThreadMember>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMBER_COLS} FROM thread_members
             WHERE thread_id = ?1 AND allow_notification = 1"
        ))?;
        let rows = stmt.query_map(params![thread_id], member_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn insert_member(conn: &rusqlite::Connection, member: &ThreadMember) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO thread_members
         (thread_id, mailbox_id, allow_read, allow_write, allow_notification)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            member.thread_id,
            member.mailbox_id,
            member.allow_read,
            member.allow_write,
            member.allow_notification,
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Mailbox;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn mailbox(store: &Store) -> Mailbox {
        let mut mailbox = Mailbox::default();
        store.insert_mailbox(&mut mailbox).unwrap();
        mailbox
    }

    #[test]
    fn insert_fills_id_and_identifier() {
        let store = store();
        let mut thread = Thread {
            subject: "standup".into(),
            ..Default::default()
        };
        store.insert_thread(&mut thread, None).unwrap();
        assert!(!thread.id.is_empty());
        assert_eq!(thread.identifier, thread.id);

        let loaded = store.get_thread(&thread.id).unwrap();
        assert_eq!(loaded, thread);
    }

    #[test]
    fn lookup_by_identifier() {
        let store = store();
        let mut thread = Thread {
            identifier: "general".into(),
            ..Default::default()
        };
        store.insert_thread(&mut thread, None).unwrap();

        let loaded = store.get_thread("general").unwrap();
        assert_eq!(loaded.id, thread.id);
    }

    #[test]
    fn duplicate_identifier_rejected_first_intact() {
        let store = store();
        let mut first = Thread {
            identifier: "general".into(),
            subject: "one".into(),
            ..Default::default()
        };
        store.insert_thread(&mut first, None).unwrap();

        let mut second = Thread {
            identifier: "general".into(),
            subject: "two".into(),
            ..Default::default()
        };
        assert!(matches!(
            store.insert_thread(&mut second, None),
            Err(StoreError::Sqlite(_))
        ));

        let loaded = store.get_thread("general").unwrap();
        assert_eq!(loaded.subject, "one");
    }

    #[test]
    fn insert_with_admin_grants_all_flags() {
        let store = store();
        let creator = mailbox(&store);
        let mut thread = Thread::default();
        store.insert_thread(&mut thread, Some(&creator.id)).unwrap();

        let members = store.get_all_members(&thread.id).unwrap();
        assert_eq!(
            members,
            vec![ThreadMember::admin(&thread.id, &creator.id)]
        );
    }

    #[test]
    fn update_preserves_blank_subject() {
        let store = store();
        let mut thread = Thread {
            subject: "original".into(),
            ..Default::default()
        };
        store.insert_thread(&mut thread, None).unwrap();

        let mut partial = Thread {
            id: thread.id.clone(),
            domain: "chat.example.com".into(),
            ..Default::default()
        };
        store.update_thread(&mut partial).unwrap();

        let loaded = store.get_thread(&thread.id).unwrap();
        assert_eq!(loaded.subject, "original");
        assert_eq!(loaded.domain, "chat.example.com");
        assert!(loaded.updated_at >= thread.updated_at);
    }

    #[test]
    fn delete_cascades_and_forgets_both_handles() {
        let store = store();
        let creator = mailbox(&store);
        let mut thread = Thread {
            identifier: "doomed".into(),
            ..Default::default()
        };
        store.insert_thread(&mut thread, Some(&creator.id)).unwrap();

        let mut message = crate::Message {
            thread_id: thread.id.clone(),
            body: "last words".into(),
            ..Default::default()
        };
        store.insert_message(&mut message).unwrap();

        store.delete_thread(&thread.id).unwrap();

        assert!(matches!(
            store.get_thread(&thread.id),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.get_thread("doomed"),
            Err(StoreError::NotFound)
        ));
        assert!(store.get_all_members(&thread.id).unwrap().is_empty());
        assert!(matches!(
            store.get_message(&message.id),
            Err(StoreError::NotFound)
        ));

        // The counter went with it: inserting again fails cleanly.
        let mut orphan = crate::Message {
            thread_id: thread.id.clone(),
            ..Default::default()
        };
        assert!(matches!(
            store.insert_message(&mut orphan),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn member_requires_existing_mailbox() {
        let store = store();
        let mut thread = Thread::default();
        store.insert_thread(&mut thread, None).unwrap();

        let member = ThreadMember {
            thread_id: thread.id.clone(),
            mailbox_id: "ghost".into(),
            allow_read: true,
            ..Default::default()
        };
        assert!(matches!(
            store.add_member(&member),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn member_lifecycle() {
        let store = store();
        let reader = mailbox(&store);
        let mut thread = Thread::default();
        store.insert_thread(&mut thread, None).unwrap();

        let mut member = ThreadMember {
            thread_id: thread.id.clone(),
            mailbox_id: reader.id.clone(),
            allow_read: true,
            allow_notification: true,
            ..Default::default()
        };
        store.add_member(&member).unwrap();

        let loaded = store.get_member(&thread.id, &reader.id).unwrap();
        assert_eq!(loaded, member);

        member.allow_write = true;
        store.update_member(&member).unwrap();
        assert!(store.get_member(&thread.id, &reader.id).unwrap().allow_write);

        assert_eq!(store.members_to_notify(&thread.id).unwrap().len(), 1);

        store.remove_member(&thread.id, &reader.id).unwrap();
        assert!(matches!(
            store.get_member(&thread.id, &reader.id),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn recent_threads_orders_by_update() {
        let store = store();
        let member = mailbox(&store);

        let mut quiet = Thread::default();
        store.insert_thread(&mut quiet, Some(&member.id)).unwrap();
        let mut busy = Thread::default();
        store.insert_thread(&mut busy, Some(&member.id)).unwrap();
        let mut foreign = Thread::default();
        store.insert_thread(&mut foreign, None).unwrap();

        // A message bumps the busy thread past the quiet one.
        store
            .conn()
            .execute(
                "UPDATE threads SET updated_at = updated_at + 1000 WHERE id = ?1",
                params![busy.id],
            )
            .unwrap();

        let recent = store.recent_threads(&member.id, 0, 10, 0).unwrap();
        let ids: Vec<&str> = recent.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![busy.id.as_str(), quiet.id.as_str()]);

        // `since` filters out stale threads.
        let busy_updated = store.get_thread(&busy.id).unwrap().updated_at;
        let recent = store
            .recent_threads(&member.id, busy_updated - 1, 10, 0)
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, busy.id);
    }
}
