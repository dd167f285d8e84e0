//! Directory queue (spec §4.4): a durable queue is a directory of files
//! named `<earliest-dispatch-epoch>-<random>.json`. A worker only dequeues
//! files whose timestamp prefix has already elapsed.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use snac_common::error::AppResult;
use snac_common::fsio::atomic_write;
use snac_common::id::IdGenerator;

use crate::item::QueueItem;

/// One file on disk paired with its parsed contents.
#[derive(Debug)]
pub struct QueueEntry {
    pub path: PathBuf,
    pub item: QueueItem,
}

/// A single durable queue directory (either the global queue or one user's).
#[derive(Debug, Clone)]
pub struct DirQueue {
    dir: PathBuf,
}

impl DirQueue {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write `item` to disk, eligible for dispatch at `earliest`.
    pub fn enqueue(&self, item: &QueueItem, earliest: DateTime<Utc>) -> AppResult<PathBuf> {
        let name = format!("{}-{}.json", earliest.timestamp(), IdGenerator.generate());
        let path = self.dir.join(name);
        let body = serde_json::to_vec_pretty(item)?;
        atomic_write(&path, &body)?;
        Ok(path)
    }

    /// List every entry whose filename timestamp has already elapsed,
    /// oldest first. Entries that fail to parse are skipped (and left on
    /// disk — a worker can inspect them manually).
    pub fn ready(&self, now: DateTime<Utc>) -> AppResult<Vec<QueueEntry>> {
        let Ok(read_dir) = fs::read_dir(&self.dir) else {
            return Ok(Vec::new());
        };

        let mut entries: Vec<(i64, PathBuf)> = Vec::new();
        for dir_entry in read_dir.flatten() {
            let path = dir_entry.path();
            let Some(ts) = dispatch_timestamp(&path) else { continue };
            if ts <= now.timestamp() {
                entries.push((ts, path));
            }
        }
        entries.sort_by_key(|(ts, _)| *ts);

        let mut out = Vec::with_capacity(entries.len());
        for (_, path) in entries {
            let Ok(bytes) = fs::read(&path) else { continue };
            let Ok(item) = serde_json::from_slice(&bytes) else { continue };
            out.push(QueueEntry { path, item });
        }
        Ok(out)
    }

    /// Remove a dispatched entry from disk.
    pub fn remove(&self, path: &Path) -> AppResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Requeue `item` at a new dispatch time, removing `old_path` first so a
    /// crash between the two never leaves the item duplicated (worst case:
    /// momentarily absent, picked up by the next dispatcher scan once the
    /// write lands).
    pub fn requeue(&self, old_path: &Path, item: &QueueItem, earliest: DateTime<Utc>) -> AppResult<PathBuf> {
        self.remove(old_path)?;
        self.enqueue(item, earliest)
    }
}

fn dispatch_timestamp(path: &Path) -> Option<i64> {
    let stem = path.file_stem()?.to_str()?;
    let (ts, _rand) = stem.split_once('-')?;
    ts.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn enqueue_then_ready_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let q = DirQueue::new(dir.path());
        let item = QueueItem::Purge;
        q.enqueue(&item, Utc::now() - Duration::seconds(1)).unwrap();

        let ready = q.ready(Utc::now()).unwrap();
        assert_eq!(ready.len(), 1);
        assert!(matches!(ready[0].item, QueueItem::Purge));
    }

    #[test]
    fn future_items_are_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let q = DirQueue::new(dir.path());
        q.enqueue(&QueueItem::Purge, Utc::now() + Duration::seconds(60)).unwrap();
        assert!(q.ready(Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn requeue_moves_the_dispatch_time() {
        let dir = tempfile::tempdir().unwrap();
        let q = DirQueue::new(dir.path());
        let path = q.enqueue(&QueueItem::Purge, Utc::now() - Duration::seconds(1)).unwrap();
        let entry = &q.ready(Utc::now()).unwrap()[0];
        assert_eq!(entry.path, path);

        q.requeue(&path, &QueueItem::Purge, Utc::now() + Duration::seconds(60)).unwrap();
        assert!(!path.exists());
        assert!(q.ready(Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn ready_entries_are_ordered_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let q = DirQueue::new(dir.path());
        q.enqueue(&QueueItem::Purge, Utc::now() - Duration::seconds(5)).unwrap();
        q.enqueue(&QueueItem::VerifyLinks, Utc::now() - Duration::seconds(50)).unwrap();

        let ready = q.ready(Utc::now()).unwrap();
        assert!(matches!(ready[0].item, QueueItem::VerifyLinks));
        assert!(matches!(ready[1].item, QueueItem::Purge));
    }
}
