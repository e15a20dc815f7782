use crate::{Store, StoreError};

/// The three membership flags, resolved per (mailbox, thread) pair.
///
/// An empty thread id means the operation has no thread scope (mailbox
/// self-mutation); those pass here and rely on owner checks at the caller.
/// A missing member row denies everything.
impl Store {
    pub fn can_read(&self, mailbox_id: &str, thread_id: &str) -> bool {
        self.member_flag(mailbox_id, thread_id, |m| m.allow_read)
    }

    pub fn can_write(&self, mailbox_id: &str, thread_id: &str) -> bool {
        self.member_flag(mailbox_id, thread_id, |m| m.allow_write)
    }

    pub fn can_follow(&self, mailbox_id: &str, thread_id: &str) -> bool {
        self.member_flag(mailbox_id, thread_id, |m| m.allow_notification)
    }

    fn member_flag(
        &self,
        mailbox_id: &str,
        thread_id: &str,
        flag: impl Fn(&crate::ThreadMember) -> bool,
    ) -> bool {
        if thread_id.is_empty() {
            return true;
        }
        match self.get_member(thread_id, mailbox_id) {
            Ok(member) => flag(&member),
            Err(StoreError::NotFound) => false,
            Err(err) => {
                tracing::warn!(%err, thread_id, mailbox_id, "permission lookup failed");
                false
            }
        }
    }
}
