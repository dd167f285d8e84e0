//! Concrete [`OutboundQueue`] implementation: enqueues straight onto the
//! owning user's real on-disk queue directory, the same path `commands.rs`'s
//! CLI helpers write to.

use chrono::Utc;
use serde_json::Value;
use snac_common::error::AppResult;
use snac_common::outbound::OutboundQueue;
use snac_store::UserStore;

use crate::dirqueue::DirQueue;
use crate::item::QueueItem;

/// Enqueues a `message` item onto a user's durable queue.
#[derive(Debug, Clone)]
pub struct QueueSink {
    users: UserStore,
}

impl QueueSink {
    #[must_use]
    pub fn new(users: UserStore) -> Self {
        Self { users }
    }
}

impl OutboundQueue for QueueSink {
    fn enqueue_message(&self, uid: &str, message: Value) -> AppResult<()> {
        let queue = DirQueue::new(self.users.queue_dir(uid));
        queue.enqueue(&QueueItem::Message { message }, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_message_lands_in_the_user_queue() {
        let dir = tempfile::tempdir().unwrap();
        let base = snac_store::Basedir::new(dir.path());
        let users = UserStore::new(base.clone());
        users.create("alice", "Alice", "Person").unwrap();

        let sink = QueueSink::new(users.clone());
        sink.enqueue_message("alice", serde_json::json!({"type": "Accept"})).unwrap();

        let queue = DirQueue::new(users.queue_dir("alice"));
        let ready = queue.ready(Utc::now()).unwrap();
        assert_eq!(ready.len(), 1);
    }
}
