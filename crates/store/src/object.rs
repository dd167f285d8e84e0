//! The content-addressed object store (spec §4.1).
//!
//! Every activity, actor, and note is a JSON document on disk at
//! `object/<2hex>/<md5(id)>.json`. Indices sitting alongside it record
//! children (replies), a note's single parent, and admiration (likes,
//! announces). All structural knowledge of the protocol (who mentions whom,
//! what a reply is) lives one layer up in `snac-federation`; this module only
//! knows about digests, files, and the four index kinds.

use std::fs::{self, File};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde_json::Value;
use snac_common::digest::md5_hex;
use snac_common::error::{AppError, AppResult};
use snac_common::fsio::atomic_write;
use snac_common::value::{get_id, get_in_reply_to};

use crate::index;
use crate::layout::{Basedir, IndexKind};

/// Outcome of [`ObjectStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The object did not exist before this call.
    Created,
    /// The object existed and was overwritten (caller passed `overwrite = true`).
    Overwritten,
    /// The object existed and `overwrite` was false; nothing was written.
    NoContent,
}

/// The kind of admiration recorded against an object (spec glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmireKind {
    /// A `Like`.
    Like,
    /// An `Announce` (boost/renote).
    Announce,
}

impl AdmireKind {
    const fn index_kind(self) -> IndexKind {
        match self {
            Self::Like => IndexKind::Likes,
            Self::Announce => IndexKind::Announces,
        }
    }
}

/// Handle onto the content-addressed object store rooted at a [`Basedir`].
#[derive(Debug, Clone)]
pub struct ObjectStore {
    base: Basedir,
}

impl ObjectStore {
    /// Wrap a base directory as an object store.
    #[must_use]
    pub fn new(base: Basedir) -> Self {
        Self { base }
    }

    /// Write `obj` (whose `id` field is the canonical URL) under its digest
    /// path. Maintains the `_p`/`_c` parent/children indices when `inReplyTo`
    /// is present. Returns [`PutOutcome::NoContent`] without writing if the
    /// object already exists and `overwrite` is false.
    pub fn put(&self, id: &str, obj: &Value, overwrite: bool) -> AppResult<PutOutcome> {
        let digest = md5_hex(id);
        let path = self.base.object_json(&digest);
        let existed = path.exists();

        if existed && !overwrite {
            return Ok(PutOutcome::NoContent);
        }

        let body = serde_json::to_vec_pretty(obj)?;
        atomic_write(&path, &body)?;

        if !existed {
            if let Some(parent_id) = get_in_reply_to(obj) {
                let parent_digest = md5_hex(parent_id);
                index::append(&self.base.object_index(&parent_digest, IndexKind::Children), &digest)?;
                let parent_idx = self.base.object_index(&digest, IndexKind::Parent);
                atomic_write(&parent_idx, format!("{parent_digest}\n").as_bytes())?;
            }
        }

        Ok(if existed {
            PutOutcome::Overwritten
        } else {
            PutOutcome::Created
        })
    }

    /// Load the object identified by `id`.
    pub fn get(&self, id: &str) -> AppResult<Value> {
        self.get_by_md5(&md5_hex(id))
    }

    /// Load the object identified by its precomputed digest.
    pub fn get_by_md5(&self, digest: &str) -> AppResult<Value> {
        let path = self.base.object_json(digest);
        let bytes = fs::read(&path)
            .map_err(|_| AppError::NotFound(format!("object {digest} not found")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Whether an object with this `id` exists on disk.
    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.exists_by_md5(&md5_hex(id))
    }

    /// Whether an object with this digest exists on disk.
    #[must_use]
    pub fn exists_by_md5(&self, digest: &str) -> bool {
        self.base.object_json(digest).exists()
    }

    /// Creation time of the stored object, if it exists.
    pub fn ctime(&self, id: &str) -> AppResult<DateTime<Utc>> {
        self.time_of(id, |m| m.created().or_else(|_| m.modified()))
    }

    /// Last-modified time of the stored object, if it exists.
    pub fn mtime(&self, id: &str) -> AppResult<DateTime<Utc>> {
        self.time_of(id, std::fs::Metadata::modified)
    }

    fn time_of(
        &self,
        id: &str,
        f: impl FnOnce(&std::fs::Metadata) -> std::io::Result<SystemTime>,
    ) -> AppResult<DateTime<Utc>> {
        let path = self.base.object_json(&md5_hex(id));
        let meta = fs::metadata(&path)
            .map_err(|_| AppError::NotFound(format!("object not found: {id}")))?;
        let t = f(&meta)?;
        Ok(DateTime::<Utc>::from(t))
    }

    /// Bump the object's modification time to now, without changing content
    /// (used after a staleness-triggered refresh decision).
    pub fn touch(&self, id: &str) -> AppResult<()> {
        let path = self.base.object_json(&md5_hex(id));
        let file = File::options().write(true).open(&path)?;
        let now = SystemTime::now();
        file.set_modified(now)?;
        Ok(())
    }

    /// Remove the object and every sibling index file (`_c`, `_p`, `_l`, `_a`).
    pub fn delete(&self, id: &str) -> AppResult<()> {
        let digest = md5_hex(id);
        let _ = fs::remove_file(self.base.object_json(&digest));
        for kind in [
            IndexKind::Children,
            IndexKind::Parent,
            IndexKind::Likes,
            IndexKind::Announces,
        ] {
            let _ = fs::remove_file(self.base.object_index(&digest, kind));
        }
        Ok(())
    }

    /// Remove the object only if no hard link from a user cache still points
    /// to it (link count < 2: the object store's own entry plus at most zero
    /// user-cache links). Returns whether it was removed.
    pub fn delete_if_unreferenced(&self, id: &str) -> AppResult<bool> {
        let digest = md5_hex(id);
        let path = self.base.object_json(&digest);
        let Ok(meta) = fs::metadata(&path) else {
            return Ok(false);
        };
        if meta.nlink() < 2 {
            self.delete(id)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Live entries of the children index (replies known locally).
    pub fn children(&self, id: &str) -> AppResult<Vec<String>> {
        index::read_all(&self.base.object_index(&md5_hex(id), IndexKind::Children))
    }

    /// The single parent digest, if any.
    pub fn parent(&self, id: &str) -> AppResult<Option<String>> {
        index::first(&self.base.object_index(&md5_hex(id), IndexKind::Parent))
    }

    /// Live entries of the likes index.
    pub fn likes(&self, id: &str) -> AppResult<Vec<String>> {
        index::read_all(&self.base.object_index(&md5_hex(id), IndexKind::Likes))
    }

    /// Live entries of the announces index.
    pub fn announces(&self, id: &str) -> AppResult<Vec<String>> {
        index::read_all(&self.base.object_index(&md5_hex(id), IndexKind::Announces))
    }

    /// Idempotently record `actor` admiring `id`. A second call for the same
    /// actor is a no-op — the index already contains a live entry.
    pub fn admire(&self, id: &str, actor: &str, kind: AdmireKind) -> AppResult<()> {
        let path = self.base.object_index(&md5_hex(id), kind.index_kind());
        let actor_digest = md5_hex(actor);
        if index::contains(&path, &actor_digest)? {
            return Ok(());
        }
        index::append(&path, &actor_digest)
    }

    /// Idempotently remove `actor`'s admiration of `id`.
    pub fn unadmire(&self, id: &str, actor: &str, kind: AdmireKind) -> AppResult<()> {
        let path = self.base.object_index(&md5_hex(id), kind.index_kind());
        index::tombstone(&path, &md5_hex(actor))
    }

    /// Run compaction on every index file belonging to `id`.
    pub fn compact(&self, id: &str) -> AppResult<()> {
        let digest = md5_hex(id);
        for kind in [IndexKind::Children, IndexKind::Likes, IndexKind::Announces] {
            let path = self.base.object_index(&digest, kind);
            if path.exists() {
                index::compact(&path)?;
            }
        }
        Ok(())
    }

    /// The digest a document would be stored under, without touching disk.
    #[must_use]
    pub fn digest_of(id: &str) -> String {
        md5_hex(id)
    }

    /// The `id` recorded inside a stored document, if present.
    #[must_use]
    pub fn stored_id(obj: &Value) -> Option<&str> {
        get_id(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(Basedir::new(dir.path()));
        (dir, store)
    }

    #[test]
    fn put_then_get_round_trips_modulo_key_order() {
        let (_dir, store) = store();
        let obj = json!({"id": "https://x/notes/1", "type": "Note", "content": "hi"});
        let outcome = store.put("https://x/notes/1", &obj, false).unwrap();
        assert_eq!(outcome, PutOutcome::Created);
        let loaded = store.get("https://x/notes/1").unwrap();
        assert_eq!(loaded, obj);
    }

    #[test]
    fn put_without_overwrite_on_existing_is_no_content() {
        let (_dir, store) = store();
        let obj = json!({"id": "https://x/notes/1", "type": "Note"});
        assert_eq!(store.put("https://x/notes/1", &obj, false).unwrap(), PutOutcome::Created);
        assert_eq!(store.put("https://x/notes/1", &obj, false).unwrap(), PutOutcome::NoContent);
    }

    #[test]
    fn put_with_overwrite_replaces_content() {
        let (_dir, store) = store();
        let v1 = json!({"id": "https://x/notes/1", "type": "Note", "content": "v1"});
        let v2 = json!({"id": "https://x/notes/1", "type": "Note", "content": "v2"});
        store.put("https://x/notes/1", &v1, false).unwrap();
        let outcome = store.put("https://x/notes/1", &v2, true).unwrap();
        assert_eq!(outcome, PutOutcome::Overwritten);
        assert_eq!(store.get("https://x/notes/1").unwrap(), v2);
    }

    #[test]
    fn reply_updates_parent_children_and_own_parent_index() {
        let (_dir, store) = store();
        let parent = json!({"id": "https://x/notes/1", "type": "Note"});
        store.put("https://x/notes/1", &parent, false).unwrap();

        let reply = json!({
            "id": "https://x/notes/2", "type": "Note", "inReplyTo": "https://x/notes/1"
        });
        store.put("https://x/notes/2", &reply, false).unwrap();

        let children = store.children("https://x/notes/1").unwrap();
        assert_eq!(children, vec![md5_hex("https://x/notes/2")]);

        let parent_digest = store.parent("https://x/notes/2").unwrap();
        assert_eq!(parent_digest, Some(md5_hex("https://x/notes/1")));
    }

    #[test]
    fn admire_is_idempotent() {
        let (_dir, store) = store();
        let obj = json!({"id": "https://x/notes/1", "type": "Note"});
        store.put("https://x/notes/1", &obj, false).unwrap();
        store.admire("https://x/notes/1", "https://y/carol", AdmireKind::Like).unwrap();
        store.admire("https://x/notes/1", "https://y/carol", AdmireKind::Like).unwrap();
        assert_eq!(store.likes("https://x/notes/1").unwrap().len(), 1);
    }

    #[test]
    fn unadmire_clears_without_error_when_absent() {
        let (_dir, store) = store();
        let obj = json!({"id": "https://x/notes/1", "type": "Note"});
        store.put("https://x/notes/1", &obj, false).unwrap();
        store.unadmire("https://x/notes/1", "https://y/carol", AdmireKind::Announce).unwrap();
        assert!(store.announces("https://x/notes/1").unwrap().is_empty());
    }

    #[test]
    fn delete_removes_json_and_indices() {
        let (_dir, store) = store();
        let obj = json!({"id": "https://x/notes/1", "type": "Note"});
        store.put("https://x/notes/1", &obj, false).unwrap();
        store.admire("https://x/notes/1", "https://y/carol", AdmireKind::Like).unwrap();
        store.delete("https://x/notes/1").unwrap();
        assert!(!store.exists("https://x/notes/1"));
        assert!(store.get("https://x/notes/1").is_err());
    }

    #[test]
    fn delete_if_unreferenced_removes_when_no_extra_hard_links() {
        let (_dir, store) = store();
        let obj = json!({"id": "https://x/notes/1", "type": "Note"});
        store.put("https://x/notes/1", &obj, false).unwrap();
        assert!(store.delete_if_unreferenced("https://x/notes/1").unwrap());
        assert!(!store.exists("https://x/notes/1"));
    }

    #[test]
    fn delete_if_unreferenced_keeps_object_with_extra_hard_link() {
        let (dir, store) = store();
        let obj = json!({"id": "https://x/notes/1", "type": "Note"});
        store.put("https://x/notes/1", &obj, false).unwrap();
        let digest = md5_hex("https://x/notes/1");
        let original = Basedir::new(dir.path()).object_json(&digest);
        let extra_link = dir.path().join("extra.json");
        fs::hard_link(&original, &extra_link).unwrap();

        assert!(!store.delete_if_unreferenced("https://x/notes/1").unwrap());
        assert!(store.exists("https://x/notes/1"));

        fs::remove_file(&extra_link).unwrap();
    }
}
