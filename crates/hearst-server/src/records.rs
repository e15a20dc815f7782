use serde::Serialize;
use serde_json::Value;

use hearst_store::{Mailbox, Message, StoreError, Thread, ThreadMember};

use crate::state::AppState;

/// The four record kinds reachable through the duplex and REST surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    Mailbox,
    Thread,
    Message,
    ThreadMember,
}

impl Model {
    pub fn parse(name: &str) -> Option<Model> {
        match name {
            "mailbox" => Some(Model::Mailbox),
            "thread" => Some(Model::Thread),
            "message" => Some(Model::Message),
            "threadmember" => Some(Model::ThreadMember),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Mailbox => "mailbox",
            Model::Thread => "thread",
            Model::Message => "message",
            Model::ThreadMember => "threadmember",
        }
    }
}

/// How a record is addressed: singleton entities by `id`, members by the
/// (thread, mailbox) pair.
#[derive(Debug, Clone, Copy)]
pub enum RecordKey<'a> {
    Id(&'a str),
    Member {
        thread_id: &'a str,
        mailbox_id: &'a str,
    },
}

/// Tagged record variant: one dispatch point instead of an open class.
#[derive(Debug, Clone)]
pub enum Record {
    Mailbox(Mailbox),
    Thread(Thread),
    ThreadMember(ThreadMember),
    Message(Message),
}

impl Record {
    pub fn model(&self) -> Model {
        match self {
            Record::Mailbox(_) => Model::Mailbox,
            Record::Thread(_) => Model::Thread,
            Record::ThreadMember(_) => Model::ThreadMember,
            Record::Message(_) => Model::Message,
        }
    }

    /// The thread whose membership gates access to this record. Mailboxes
    /// have no thread scope; their callers do owner checks instead.
    pub fn permission_thread(&self) -> &str {
        match self {
            Record::Mailbox(_) => "",
            Record::Thread(thread) => &thread.id,
            Record::ThreadMember(member) => &member.thread_id,
            Record::Message(message) => &message.thread_id,
        }
    }

    /// Deserialize an entity body into the given model's record.
    pub fn from_body(model: Model, body: Value) -> Result<Record, serde_json::Error> {
        Ok(match model {
            Model::Mailbox => Record::Mailbox(serde_json::from_value(body)?),
            Model::Thread => Record::Thread(serde_json::from_value(body)?),
            Model::Message => Record::Message(serde_json::from_value(body)?),
            Model::ThreadMember => Record::ThreadMember(serde_json::from_value(body)?),
        })
    }

    pub fn to_value(&self) -> Value {
        let serialized = match self {
            Record::Mailbox(mailbox) => serde_json::to_value(mailbox),
            Record::Thread(thread) => serde_json::to_value(thread),
            Record::ThreadMember(member) => serde_json::to_value(member),
            Record::Message(message) => serde_json::to_value(message),
        };
        serialized.unwrap_or(Value::Null)
    }
}

impl AppState {
    /// Load a record by key. `NotFound` stays distinct for the surfaces.
    pub fn load_record(&self, model: Model, key: RecordKey) -> Result<Record, StoreError> {
        match (model, key) {
            (Model::Mailbox, RecordKey::Id(id)) => {
                self.store.get_mailbox(id).map(Record::Mailbox)
            }
            (Model::Thread, RecordKey::Id(id)) => self.store.get_thread(id).map(Record::Thread),
            (Model::Message, RecordKey::Id(id)) => {
                self.store.get_message(id).map(Record::Message)
            }
            (
                Model::ThreadMember,
                RecordKey::Member {
                    thread_id,
                    mailbox_id,
                },
            ) => self
                .store
                .get_member(thread_id, mailbox_id)
                .map(Record::ThreadMember),
            _ => Err(StoreError::InvalidInput("record key does not fit model")),
        }
    }

    /// Insert a record and announce the change. For threads, `creator`
    /// receives an all-true membership inside the insert transaction and
    /// blank domains take the server's own.
    pub fn insert_record(
        &self,
        record: &mut Record,
        creator: Option<&str>,
    ) -> Result<(), StoreError> {
        match record {
            Record::Mailbox(mailbox) => {
                self.store.insert_mailbox(mailbox)?;
                self.announce(&format!("mailbox-insert-{}", mailbox.id), mailbox);
            }
            Record::Thread(thread) => {
                if thread.domain.is_empty() {
                    thread.domain = self.domain.clone();
                }
                self.store.insert_thread(thread, creator)?;
                self.announce(&format!("thread-insert-{}", thread.id), thread);
                if let Some(mailbox_id) = creator {
                    let admin = ThreadMember::admin(&thread.id, mailbox_id);
                    self.announce(&format!("threadmember-insert-{}", thread.id), &admin);
                }
            }
            Record::ThreadMember(member) => {
                self.store.add_member(member)?;
                self.announce(&format!("threadmember-insert-{}", member.thread_id), member);
            }
            Record::Message(message) => {
                self.store.insert_message(message)?;
                self.announce_message_insert(message);
            }
        }
        Ok(())
    }

    /// Update a record in place; on return the record holds its stored
    /// state.
    pub fn update_record(&self, record: &mut Record) -> Result<(), StoreError> {
        match record {
            Record::Mailbox(mailbox) => {
                self.store.update_mailbox(mailbox)?;
                self.announce(&format!("mailbox-update-{}", mailbox.id), mailbox);
            }
            Record::Thread(thread) => {
                self.store.update_thread(thread)?;
                self.announce(&format!("thread-update-{}", thread.id), thread);
            }
            Record::ThreadMember(member) => {
                self.store.update_member(member)?;
                self.announce(&format!("threadmember-update-{}", member.thread_id), member);
            }
            Record::Message(message) => {
                self.store.update_message(message)?;
                self.announce(&format!("message-update-{}", message.thread_id), message);
            }
        }
        Ok(())
    }

    /// Delete by pre-loaded snapshot so callers can echo the last state.
    pub fn delete_record(&self, record: &Record) -> Result<(), StoreError> {
        match record {
            Record::Mailbox(mailbox) => {
                self.store.delete_mailbox(&mailbox.id)?;
                self.announce(&format!("mailbox-delete-{}", mailbox.id), mailbox);
            }
            Record::Thread(thread) => {
                self.store.delete_thread(&thread.id)?;
                self.announce(&format!("thread-delete-{}", thread.id), thread);
            }
            Record::ThreadMember(member) => {
                self.store
                    .remove_member(&member.thread_id, &member.mailbox_id)?;
                self.announce(&format!("threadmember-delete-{}", member.thread_id), member);
            }
            Record::Message(message) => {
                self.store.delete_message(&message.id)?;
                self.announce(&format!("message-delete-{}", message.thread_id), message);
            }
        }
        Ok(())
    }

    /// Publish happens strictly after commit, and a broken bus never fails
    /// the durable write.
    fn announce<T: Serialize>(&self, event_id: &str, payload: &T) {
        if let Err(err) = self.stream.announce(event_id, payload) {
            tracing::warn!(event_id, %err, "failed to announce event");
        }
    }

    /// The message-insert fan-out: the thread-scoped insert event plus one
    /// notification intent per member that asked for them.
    fn announce_message_insert(&self, message: &Message) {
        self.announce(&format!("message-insert-{}", message.thread_id), message);

        match self.store.members_to_notify(&message.thread_id) {
            Ok(members) => {
                for member in members {
                    self.announce(
                        &format!("message-notification-{}", member.mailbox_id),
                        message,
                    );
                }
            }
            Err(err) => {
                tracing::warn!(thread = %message.thread_id, %err, "could not load notifiable members");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearst_auth::Keypair;
    use hearst_stream::{Bus, EventStream};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    async fn state() -> Arc<AppState> {
        AppState::new(
            hearst_store::Store::open_in_memory().unwrap(),
            EventStream::new(Bus::new()),
            Keypair::generate(),
            "chat.example.com",
        )
    }

    #[tokio::test]
    async fn thread_insert_fills_domain_and_announces() {
        let state = state().await;
        let mut events = state.stream.event_channel("thread-insert-").await;

        let mut record = Record::Thread(Thread::default());
        state.insert_record(&mut record, None).unwrap();

        let Record::Thread(thread) = &record else {
            panic!("variant changed");
        };
        assert_eq!(thread.domain, "chat.example.com");

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.object_id, thread.id);
    }

    #[tokio::test]
    async fn message_insert_emits_notification_intents() {
        let state = state().await;

        let mut creator = Mailbox::default();
        state.store.insert_mailbox(&mut creator).unwrap();
        let mut record = Record::Thread(Thread::default());
        state.insert_record(&mut record, Some(&creator.id)).unwrap();
        let thread_id = record.permission_thread().to_string();

        let mut intents = state
            .stream
            .event_channel(&format!("message-notification-{}", creator.id))
            .await;

        let mut message = Record::Message(Message {
            thread_id: thread_id.clone(),
            body: "ping".into(),
            ..Default::default()
        });
        state.insert_record(&mut message, None).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), intents.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.model, "message");
        assert_eq!(event.action, "notification");
        assert_eq!(event.object_id, creator.id);
        assert_eq!(event.payload["body"], json!("ping"));
    }

    #[tokio::test]
    async fn load_record_key_shapes() {
        let state = state().await;
        let mut mailbox = Mailbox::default();
        state.store.insert_mailbox(&mut mailbox).unwrap();

        let loaded = state
            .load_record(Model::Mailbox, RecordKey::Id(&mailbox.id))
            .unwrap();
        assert_eq!(loaded.permission_thread(), "");

        assert!(matches!(
            state.load_record(
                Model::ThreadMember,
                RecordKey::Id("wrong-shape"),
            ),
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn model_names_round_trip() {
        for model in [
            Model::Mailbox,
            Model::Thread,
            Model::Message,
            Model::ThreadMember,
        ] {
            assert_eq!(Model::parse(model.as_str()), Some(model));
        }
        assert_eq!(Model::parse("werewolf"), None);
    }
}
