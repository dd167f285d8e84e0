//! Dispatcher: scans the global queue and every user's queue directory on a
//! short interval and pushes eligible items into the in-memory FIFO the
//! worker pool consumes (spec §4.8's threading model).

use std::time::Duration;

use chrono::Utc;
use snac_federation::AppContext;
use tokio::sync::mpsc;

use crate::dirqueue::{DirQueue, QueueEntry};

/// One dequeued item, tagged with the queue it came from so a worker can
/// requeue it into the same place.
#[derive(Debug)]
pub struct DispatchedEntry {
    pub entry: QueueEntry,
    pub queue: DirQueue,
    /// `None` for the global/shared-inbox queue.
    pub uid: Option<String>,
}

/// Scan both queue directories once and push every ready item into `tx`.
/// Returns the number of items dispatched.
pub fn scan_once(ctx: &AppContext, tx: &mpsc::UnboundedSender<DispatchedEntry>) -> usize {
    let now = Utc::now();
    let mut dispatched = 0;

    let global = DirQueue::new(ctx.base.global_queue_dir());
    if let Ok(ready) = global.ready(now) {
        for entry in ready {
            dispatched += 1;
            let _ = tx.send(DispatchedEntry { entry, queue: global.clone(), uid: None });
        }
    }

    let Ok(uids) = ctx.users.list_uids() else { return dispatched };
    for uid in uids {
        let queue = DirQueue::new(ctx.users.queue_dir(&uid));
        let Ok(ready) = queue.ready(now) else { continue };
        for entry in ready {
            dispatched += 1;
            let _ = tx.send(DispatchedEntry { entry, queue: queue.clone(), uid: Some(uid.clone()) });
        }
    }
    dispatched
}

/// Run the dispatcher loop forever, scanning every `interval`.
pub async fn run(ctx: AppContext, tx: mpsc::UnboundedSender<DispatchedEntry>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let n = scan_once(&ctx, &tx);
        if n > 0 {
            tracing::debug!(count = n, "dispatched queue items");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::QueueItem;
    use std::sync::Arc;

    fn ctx() -> (tempfile::TempDir, AppContext) {
        let dir = tempfile::tempdir().unwrap();
        let base = snac_store::Basedir::new(dir.path());
        let config = snac_common::config::ServerConfig::new("example.com".to_string());
        let ctx = AppContext::new(
            base,
            config,
            Arc::new(snac_mfm::DefaultFormatter),
            Arc::new(snac_common::webfinger::HttpResolver::new("test".to_string())),
            Arc::new(snac_common::notify::NullSink),
            Arc::new(snac_common::outbound::NullOutboundQueue),
        );
        (dir, ctx)
    }

    #[test]
    fn scan_once_picks_up_global_and_per_user_items() {
        let (_dir, ctx) = ctx();
        ctx.users.create("alice", "Alice", "Person").unwrap();

        let global = DirQueue::new(ctx.base.global_queue_dir());
        global.enqueue(&QueueItem::Purge, Utc::now()).unwrap();

        let per_user = DirQueue::new(ctx.users.queue_dir("alice"));
        per_user.enqueue(&QueueItem::VerifyLinks, Utc::now()).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatched = scan_once(&ctx, &tx);
        assert_eq!(dispatched, 2);

        let mut saw_global = false;
        let mut saw_user = false;
        while let Ok(d) = rx.try_recv() {
            match d.uid {
                None => saw_global = true,
                Some(uid) => {
                    assert_eq!(uid, "alice");
                    saw_user = true;
                }
            }
        }
        assert!(saw_global && saw_user);
    }
}
