//! Per-user state (spec §4.2): profile, RSA keypair, the eight relation
//! sets, timeline hard-links, actor lists, and the personal queue directory.

use std::fs;

use chrono::{DateTime, Utc};
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snac_common::digest::md5_hex;
use snac_common::error::{AppError, AppResult};
use snac_common::fsio::atomic_write;

use crate::index;
use crate::layout::{relation, Basedir};
use crate::object::ObjectStore;

/// RSA key size used for new actors. Matches the teacher's federation keys.
const RSA_KEY_BITS: usize = 2048;

/// Local profile record for one user. Kept as a typed struct (unlike
/// protocol documents) since it is never round-tripped to a remote peer;
/// `extra` still absorbs fields this engine does not otherwise model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub uid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub actor_type: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub header_url: Option<String>,
    #[serde(default)]
    pub password_hash: Option<String>,
    pub created: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Value,
}

/// A user's RSA keypair, PKCS8 PEM-encoded on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyPair {
    pub public_pem: String,
    pub private_pem: String,
}

impl KeyPair {
    fn generate() -> AppResult<Self> {
        let mut rng = OsRng;
        let private = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| AppError::Internal(format!("rsa keygen failed: {e}")))?;
        let public = RsaPublicKey::from(&private);

        let private_pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AppError::Internal(format!("pkcs8 encode failed: {e}")))?
            .to_string();
        let public_pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AppError::Internal(format!("spki encode failed: {e}")))?;

        Ok(Self { public_pem, private_pem })
    }

    /// Parse the stored private key, for signing outgoing requests.
    pub fn private_key(&self) -> AppResult<RsaPrivateKey> {
        RsaPrivateKey::from_pkcs8_pem(&self.private_pem)
            .map_err(|e| AppError::Internal(format!("bad stored private key: {e}")))
    }

    /// Parse the stored public key, for `publicKey.publicKeyPem`.
    pub fn public_key(&self) -> AppResult<RsaPublicKey> {
        RsaPublicKey::from_public_key_pem(&self.public_pem)
            .map_err(|e| AppError::Internal(format!("bad stored public key: {e}")))
    }
}

/// One entry in a relation set: a follower, a following, a pinned post id,
/// and so on. The subject is whatever URI the relation tracks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationEntry {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
}

/// Which timeline an object is hard-linked into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

/// Handle onto one instance's per-user state.
#[derive(Debug, Clone)]
pub struct UserStore {
    base: Basedir,
}

impl UserStore {
    #[must_use]
    pub fn new(base: Basedir) -> Self {
        Self { base }
    }

    /// Create a brand-new local user: generates a keypair and writes
    /// `user.json`/`key.json`. Fails if the uid is already taken.
    pub fn create(&self, uid: &str, name: &str, actor_type: &str) -> AppResult<UserRecord> {
        if self.exists(uid) {
            return Err(AppError::Conflict(format!("user already exists: {uid}")));
        }

        let record = UserRecord {
            uid: uid.to_string(),
            name: name.to_string(),
            actor_type: actor_type.to_string(),
            bio: None,
            avatar_url: None,
            header_url: None,
            password_hash: None,
            created: Utc::now(),
            extra: Value::Object(Default::default()),
        };

        let keys = KeyPair::generate()?;
        self.save(&record)?;
        atomic_write(&self.base.user_key_json(uid), serde_json::to_vec_pretty(&keys)?.as_slice())?;
        Ok(record)
    }

    /// Whether a local user directory exists for `uid`.
    #[must_use]
    pub fn exists(&self, uid: &str) -> bool {
        self.base.user_json(uid).exists()
    }

    /// Every local uid with a `user.json`, in directory-listing order.
    pub fn list_uids(&self) -> AppResult<Vec<String>> {
        let dir = self.base.root().join("user");
        let Ok(read_dir) = fs::read_dir(&dir) else {
            return Ok(Vec::new());
        };
        let mut uids = Vec::new();
        for entry in read_dir.flatten() {
            let Some(uid) = entry.file_name().to_str().map(str::to_string) else { continue };
            if self.exists(&uid) {
                uids.push(uid);
            }
        }
        Ok(uids)
    }

    /// Load a user's profile.
    pub fn load(&self, uid: &str) -> AppResult<UserRecord> {
        let bytes = fs::read(self.base.user_json(uid))
            .map_err(|_| AppError::NotFound(format!("no such user: {uid}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Persist a user's profile.
    pub fn save(&self, record: &UserRecord) -> AppResult<()> {
        atomic_write(&self.base.user_json(&record.uid), serde_json::to_vec_pretty(record)?.as_slice())
    }

    /// Load a user's keypair.
    pub fn load_keypair(&self, uid: &str) -> AppResult<KeyPair> {
        let bytes = fs::read(self.base.user_key_json(uid))
            .map_err(|_| AppError::NotFound(format!("no keypair for user: {uid}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Remove every file belonging to this user (the `deluser` command).
    pub fn delete(&self, uid: &str) -> AppResult<()> {
        let dir = self.base.user_dir(uid);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    /// Whether `subject` has a live entry in `relation`.
    pub fn relation_contains(&self, uid: &str, relation: &str, subject: &str) -> bool {
        self.base
            .user_relation_entry(uid, relation, &md5_hex(subject))
            .exists()
    }

    /// Add `subject` to a relation set. Idempotent: re-adding overwrites the
    /// stored entry (so an updated `activity_id` for a pending follow sticks).
    pub fn relation_add(
        &self,
        uid: &str,
        relation: &str,
        subject: &str,
        activity_id: Option<&str>,
    ) -> AppResult<()> {
        let entry = RelationEntry {
            subject: subject.to_string(),
            activity_id: activity_id.map(str::to_string),
        };
        let path = self.base.user_relation_entry(uid, relation, &md5_hex(subject));
        atomic_write(&path, serde_json::to_vec(&entry)?.as_slice())
    }

    /// Remove `subject` from a relation set. Missing entries are a no-op.
    pub fn relation_remove(&self, uid: &str, relation: &str, subject: &str) -> AppResult<()> {
        let path = self.base.user_relation_entry(uid, relation, &md5_hex(subject));
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// List every live entry in a relation set.
    pub fn relation_list(&self, uid: &str, relation: &str) -> AppResult<Vec<RelationEntry>> {
        let dir = self.base.user_relation_dir(uid, relation);
        let Ok(read_dir) = fs::read_dir(&dir) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let bytes = fs::read(entry.path())?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    /// Follower-set shorthand.
    pub fn is_follower(&self, uid: &str, actor: &str) -> bool {
        self.relation_contains(uid, relation::FOLLOWERS, actor)
    }

    /// Following-set shorthand.
    pub fn is_following(&self, uid: &str, actor: &str) -> bool {
        self.relation_contains(uid, relation::FOLLOWING, actor)
    }

    /// Hard-link an object from the global store into this user's timeline
    /// (spec §3: "per-user timeline entries are hard links from the global
    /// object store") and append it to the matching timeline index.
    pub fn timeline_link(
        &self,
        uid: &str,
        visibility: Visibility,
        store: &ObjectStore,
        id: &str,
    ) -> AppResult<()> {
        let digest = md5_hex(id);
        let source = self.base.object_json(&digest);
        if !source.exists() {
            return Err(AppError::NotFound(format!("object not in store: {id}")));
        }

        let (target, idx) = match visibility {
            Visibility::Public => (
                self.base.user_public_entry(uid, &digest),
                self.base.user_public_index(uid),
            ),
            Visibility::Private => (
                self.base.user_private_entry(uid, &digest),
                self.base.user_private_index(uid),
            ),
        };

        if target.exists() {
            return Ok(());
        }
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::hard_link(&source, &target)?;
        index::append(&idx, &digest)?;
        Ok(())
    }

    /// Remove a hard link from this user's timeline and, if no other
    /// reference to the object remains, delete it from the global store too.
    pub fn timeline_unlink(
        &self,
        uid: &str,
        visibility: Visibility,
        store: &ObjectStore,
        id: &str,
    ) -> AppResult<()> {
        let digest = md5_hex(id);
        let (target, idx) = match visibility {
            Visibility::Public => (
                self.base.user_public_entry(uid, &digest),
                self.base.user_public_index(uid),
            ),
            Visibility::Private => (
                self.base.user_private_entry(uid, &digest),
                self.base.user_private_index(uid),
            ),
        };

        match fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        index::tombstone(&idx, &digest)?;
        store.delete_if_unreferenced(id)?;
        Ok(())
    }

    /// Paginate a user's public timeline, newest first.
    pub fn public_timeline(&self, uid: &str, skip: usize, n: usize) -> AppResult<Vec<String>> {
        index::last_n(&self.base.user_public_index(uid), skip, n)
    }

    /// Paginate a user's private (followers-only) timeline, newest first.
    pub fn private_timeline(&self, uid: &str, skip: usize, n: usize) -> AppResult<Vec<String>> {
        index::last_n(&self.base.user_private_index(uid), skip, n)
    }

    /// Create a named actor list, returning its digest (used in later
    /// membership calls). Collisions on the generated digest are treated as
    /// "already exists" since list names need not be unique but ids must be.
    pub fn list_create(&self, uid: &str, name: &str) -> AppResult<String> {
        let digest = md5_hex(&format!("{uid}:{name}:{}", Utc::now().to_rfc3339()));
        let meta_path = self.base.user_list_base(uid, &digest).with_extension("id");
        atomic_write(&meta_path, name.as_bytes())?;
        Ok(digest)
    }

    /// The display name of a list.
    pub fn list_name(&self, uid: &str, list_digest: &str) -> AppResult<String> {
        let meta_path = self.base.user_list_base(uid, list_digest).with_extension("id");
        let bytes = fs::read(&meta_path)
            .map_err(|_| AppError::NotFound(format!("no such list: {list_digest}")))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Every list belonging to a user, as `(digest, name)` pairs.
    pub fn lists(&self, uid: &str) -> AppResult<Vec<(String, String)>> {
        let dir = self.base.user_list_dir(uid);
        let Ok(read_dir) = fs::read_dir(&dir) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("id") {
                let digest = path.file_stem().unwrap_or_default().to_string_lossy().into_owned();
                let name = String::from_utf8_lossy(&fs::read(&path)?).into_owned();
                out.push((digest, name));
            }
        }
        Ok(out)
    }

    /// Add an actor to a list's membership index.
    pub fn list_add_member(&self, uid: &str, list_digest: &str, actor: &str) -> AppResult<()> {
        let path = self.base.user_list_base(uid, list_digest).with_extension("lst");
        let actor_digest = md5_hex(actor);
        if index::contains(&path, &actor_digest)? {
            return Ok(());
        }
        index::append(&path, &actor_digest)
    }

    /// Remove an actor from a list's membership index.
    pub fn list_remove_member(&self, uid: &str, list_digest: &str, actor: &str) -> AppResult<()> {
        let path = self.base.user_list_base(uid, list_digest).with_extension("lst");
        index::tombstone(&path, &md5_hex(actor))
    }

    /// Live membership of a list.
    pub fn list_members(&self, uid: &str, list_digest: &str) -> AppResult<Vec<String>> {
        let path = self.base.user_list_base(uid, list_digest).with_extension("lst");
        index::read_all(&path)
    }

    /// A list's own timeline, newest first (the posts it has collected from
    /// its members via [`Self::list_distribute`]).
    pub fn list_timeline(&self, uid: &str, list_digest: &str, skip: usize, n: usize) -> AppResult<Vec<String>> {
        let path = self.base.user_list_base(uid, list_digest).with_extension("idx");
        index::last_n(&path, skip, n)
    }

    /// Fan an `Announce`d or attributed object out to every list `actor`
    /// belongs to, appending it to each matching list's own timeline.
    /// Mirrors the C reference's `list_distribute`: lists are plain
    /// member-only feeds, independent of the public/private timelines.
    pub fn list_distribute(&self, uid: &str, actor: &str, object_id: &str) -> AppResult<()> {
        let actor_digest = md5_hex(actor);
        let object_digest = md5_hex(object_id);
        for (list_digest, _name) in self.lists(uid)? {
            let members = self.base.user_list_base(uid, &list_digest).with_extension("lst");
            if index::contains(&members, &actor_digest)? {
                let timeline = self.base.user_list_base(uid, &list_digest).with_extension("idx");
                index::append(&timeline, &object_digest)?;
            }
        }
        Ok(())
    }

    /// `<basedir>/user/<uid>/queue/` for enqueueing per-user queue items.
    #[must_use]
    pub fn queue_dir(&self, uid: &str) -> std::path::PathBuf {
        self.base.user_queue_dir(uid)
    }

    /// Archive `prior` as an object's revision before an `Update` overwrites
    /// it in the object store.
    pub fn history_write(&self, uid: &str, id: &str, prior: &Value) -> AppResult<()> {
        let path = self.base.user_history_entry(uid, &md5_hex(id));
        atomic_write(&path, serde_json::to_vec_pretty(prior)?.as_slice())
    }

    /// The revision of `id` archived just before its most recent `Update`,
    /// if one was ever overwritten.
    pub fn history(&self, uid: &str, id: &str) -> AppResult<Option<Value>> {
        let path = self.base.user_history_entry(uid, &md5_hex(id));
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stores() -> (tempfile::TempDir, UserStore, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let base = Basedir::new(dir.path());
        (dir, UserStore::new(base.clone()), ObjectStore::new(base))
    }

    #[test]
    fn create_then_load_round_trips() {
        let (_dir, users, _objects) = stores();
        let created = users.create("alice", "Alice", "Person").unwrap();
        let loaded = users.load("alice").unwrap();
        assert_eq!(created, loaded);
        assert!(users.exists("alice"));
    }

    #[test]
    fn list_uids_reports_every_created_user() {
        let (_dir, users, _objects) = stores();
        users.create("alice", "Alice", "Person").unwrap();
        users.create("bob", "Bob", "Person").unwrap();
        let mut uids = users.list_uids().unwrap();
        uids.sort();
        assert_eq!(uids, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn create_twice_conflicts() {
        let (_dir, users, _objects) = stores();
        users.create("alice", "Alice", "Person").unwrap();
        assert!(matches!(users.create("alice", "Alice", "Person"), Err(AppError::Conflict(_))));
    }

    #[test]
    fn keypair_round_trips_through_rsa_parsing() {
        let (_dir, users, _objects) = stores();
        users.create("alice", "Alice", "Person").unwrap();
        let keys = users.load_keypair("alice").unwrap();
        keys.private_key().unwrap();
        keys.public_key().unwrap();
    }

    #[test]
    fn relation_add_list_remove_round_trips() {
        let (_dir, users, _objects) = stores();
        users.create("alice", "Alice", "Person").unwrap();
        users
            .relation_add("alice", relation::FOLLOWERS, "https://remote/bob", Some("https://remote/activities/1"))
            .unwrap();
        assert!(users.is_follower("alice", "https://remote/bob"));

        let listed = users.relation_list("alice", relation::FOLLOWERS).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].subject, "https://remote/bob");

        users.relation_remove("alice", relation::FOLLOWERS, "https://remote/bob").unwrap();
        assert!(!users.is_follower("alice", "https://remote/bob"));
    }

    #[test]
    fn timeline_link_then_unlink_deletes_when_unreferenced() {
        let (_dir, users, objects) = stores();
        users.create("alice", "Alice", "Person").unwrap();
        let note = serde_json::json!({"id": "https://x/notes/1", "type": "Note"});
        objects.put("https://x/notes/1", &note, false).unwrap();

        users.timeline_link("alice", Visibility::Public, &objects, "https://x/notes/1").unwrap();
        assert_eq!(users.public_timeline("alice", 0, 10).unwrap(), vec![md5_hex("https://x/notes/1")]);

        users.timeline_unlink("alice", Visibility::Public, &objects, "https://x/notes/1").unwrap();
        assert!(users.public_timeline("alice", 0, 10).unwrap().is_empty());
        assert!(!objects.exists("https://x/notes/1"));
    }

    #[test]
    fn history_write_then_read_round_trips_and_absent_is_none() {
        let (_dir, users, _objects) = stores();
        users.create("alice", "Alice", "Person").unwrap();
        assert_eq!(users.history("alice", "https://x/notes/1").unwrap(), None);

        let prior = serde_json::json!({"id": "https://x/notes/1", "content": "v1"});
        users.history_write("alice", "https://x/notes/1", &prior).unwrap();
        assert_eq!(users.history("alice", "https://x/notes/1").unwrap(), Some(prior));
    }

    #[test]
    fn list_create_add_member_and_list_round_trips() {
        let (_dir, users, _objects) = stores();
        users.create("alice", "Alice", "Person").unwrap();
        let digest = users.list_create("alice", "Friends").unwrap();
        assert_eq!(users.list_name("alice", &digest).unwrap(), "Friends");

        users.list_add_member("alice", &digest, "https://remote/bob").unwrap();
        assert_eq!(users.list_members("alice", &digest).unwrap(), vec![md5_hex("https://remote/bob")]);

        users.list_remove_member("alice", &digest, "https://remote/bob").unwrap();
        assert!(users.list_members("alice", &digest).unwrap().is_empty());
    }

    #[test]
    fn list_distribute_only_lists_posts_from_member_actors() {
        let (_dir, users, _objects) = stores();
        users.create("alice", "Alice", "Person").unwrap();
        let friends = users.list_create("alice", "Friends").unwrap();
        users.list_add_member("alice", &friends, "https://remote/bob").unwrap();

        users.list_distribute("alice", "https://remote/bob", "https://remote/bob/p/1").unwrap();
        users.list_distribute("alice", "https://remote/carol", "https://remote/carol/p/1").unwrap();

        assert_eq!(
            users.list_timeline("alice", &friends, 0, 10).unwrap(),
            vec![md5_hex("https://remote/bob/p/1")]
        );
    }
}
