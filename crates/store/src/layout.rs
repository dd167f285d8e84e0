//! Path conventions for the on-disk tree described in spec §6.
//!
//! `Basedir` is the one place that knows how digests, user ids, and index
//! kinds map to paths. Every other module in this crate goes through it
//! instead of formatting paths inline.

use std::path::{Path, PathBuf};

use snac_common::digest::shard_prefix;

/// The kind of per-object index file (`_c`, `_p`, `_l`, `_a`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Children (replies) of a note.
    Children,
    /// Parent (singular) of a note.
    Parent,
    /// Likes (admirers) of an object.
    Likes,
    /// Announces (boosters) of an object.
    Announces,
}

impl IndexKind {
    /// The filename suffix for this index kind, e.g. `_c.idx`.
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Children => "_c.idx",
            Self::Parent => "_p.idx",
            Self::Likes => "_l.idx",
            Self::Announces => "_a.idx",
        }
    }
}

/// Root of a single instance's data directory.
#[derive(Debug, Clone)]
pub struct Basedir {
    root: PathBuf,
}

impl Basedir {
    /// Wrap a base directory path. Does not touch the filesystem.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The wrapped root path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<basedir>/server.json`.
    #[must_use]
    pub fn server_json(&self) -> PathBuf {
        self.root.join("server.json")
    }

    /// `<basedir>/object/<2hex>/`.
    #[must_use]
    pub fn object_shard_dir(&self, digest: &str) -> PathBuf {
        self.root.join("object").join(shard_prefix(digest))
    }

    /// `<basedir>/object/<2hex>/<md5>.json`.
    #[must_use]
    pub fn object_json(&self, digest: &str) -> PathBuf {
        self.object_shard_dir(digest).join(format!("{digest}.json"))
    }

    /// `<basedir>/object/<2hex>/<md5>_{c,p,l,a}.idx`.
    #[must_use]
    pub fn object_index(&self, digest: &str, kind: IndexKind) -> PathBuf {
        self.object_shard_dir(digest)
            .join(format!("{digest}{}", kind.suffix()))
    }

    /// `<basedir>/inbox/<md5(host)>` — shared-inbox set entries.
    #[must_use]
    pub fn shared_inbox_entry(&self, host_digest: &str) -> PathBuf {
        self.root.join("inbox").join(host_digest)
    }

    /// `<basedir>/inbox/`.
    #[must_use]
    pub fn shared_inbox_dir(&self) -> PathBuf {
        self.root.join("inbox")
    }

    /// `<basedir>/block/<md5(host)>` — blocked-instance set entries.
    #[must_use]
    pub fn block_entry(&self, host_digest: &str) -> PathBuf {
        self.root.join("block").join(host_digest)
    }

    /// `<basedir>/block/`.
    #[must_use]
    pub fn block_dir(&self) -> PathBuf {
        self.root.join("block")
    }

    /// `<basedir>/public.idx` — instance public timeline.
    #[must_use]
    pub fn public_timeline(&self) -> PathBuf {
        self.root.join("public.idx")
    }

    /// `<basedir>/queue/` — global queue directory.
    #[must_use]
    pub fn global_queue_dir(&self) -> PathBuf {
        self.root.join("queue")
    }

    /// `<basedir>/error/` — archived failed items.
    #[must_use]
    pub fn error_dir(&self) -> PathBuf {
        self.root.join("error")
    }

    /// `<basedir>/user/<uid>/`.
    #[must_use]
    pub fn user_dir(&self, uid: &str) -> PathBuf {
        self.root.join("user").join(uid)
    }

    /// `<basedir>/user/<uid>/user.json`.
    #[must_use]
    pub fn user_json(&self, uid: &str) -> PathBuf {
        self.user_dir(uid).join("user.json")
    }

    /// `<basedir>/user/<uid>/key.json`.
    #[must_use]
    pub fn user_key_json(&self, uid: &str) -> PathBuf {
        self.user_dir(uid).join("key.json")
    }

    /// `<basedir>/user/<uid>/links.json`.
    #[must_use]
    pub fn user_links_json(&self, uid: &str) -> PathBuf {
        self.user_dir(uid).join("links.json")
    }

    /// `<basedir>/user/<uid>/<relation>/` — one of the relation-set directories.
    #[must_use]
    pub fn user_relation_dir(&self, uid: &str, relation: &str) -> PathBuf {
        self.user_dir(uid).join(relation)
    }

    /// `<basedir>/user/<uid>/<relation>/<md5>.json` — one relation entry.
    #[must_use]
    pub fn user_relation_entry(&self, uid: &str, relation: &str, digest: &str) -> PathBuf {
        self.user_relation_dir(uid, relation)
            .join(format!("{digest}.json"))
    }

    /// `<basedir>/user/<uid>/public/<md5>.json` — hard link into the object store.
    #[must_use]
    pub fn user_public_entry(&self, uid: &str, digest: &str) -> PathBuf {
        self.user_dir(uid).join("public").join(format!("{digest}.json"))
    }

    /// `<basedir>/user/<uid>/private/<md5>.json` — hard link into the object store.
    #[must_use]
    pub fn user_private_entry(&self, uid: &str, digest: &str) -> PathBuf {
        self.user_dir(uid).join("private").join(format!("{digest}.json"))
    }

    /// `<basedir>/user/<uid>/public.idx` — the user's public timeline order.
    #[must_use]
    pub fn user_public_index(&self, uid: &str) -> PathBuf {
        self.user_dir(uid).join("public.idx")
    }

    /// `<basedir>/user/<uid>/private.idx` — the user's private (followers-only) timeline order.
    #[must_use]
    pub fn user_private_index(&self, uid: &str) -> PathBuf {
        self.user_dir(uid).join("private.idx")
    }

    /// `<basedir>/user/<uid>/queue/` — per-user queue directory.
    #[must_use]
    pub fn user_queue_dir(&self, uid: &str) -> PathBuf {
        self.user_dir(uid).join("queue")
    }

    /// `<basedir>/user/<uid>/notify/` and `<basedir>/user/<uid>/notify.idx`.
    #[must_use]
    pub fn user_notify_dir(&self, uid: &str) -> PathBuf {
        self.user_dir(uid).join("notify")
    }

    /// `<basedir>/user/<uid>/notify.idx`.
    #[must_use]
    pub fn user_notify_index(&self, uid: &str) -> PathBuf {
        self.user_dir(uid).join("notify.idx")
    }

    /// `<basedir>/user/<uid>/list/`.
    #[must_use]
    pub fn user_list_dir(&self, uid: &str) -> PathBuf {
        self.user_dir(uid).join("list")
    }

    /// `<basedir>/user/<uid>/list/<hex>.{id,lst,idx}` base path (extension appended by caller).
    #[must_use]
    pub fn user_list_base(&self, uid: &str, list_digest: &str) -> PathBuf {
        self.user_list_dir(uid).join(list_digest)
    }

    /// `<basedir>/user/<uid>/history/<md5>.json` — prior revisions kept for Updates.
    #[must_use]
    pub fn user_history_entry(&self, uid: &str, digest: &str) -> PathBuf {
        self.user_dir(uid).join("history").join(format!("{digest}.json"))
    }
}

/// Relation-set directory names used under `user/<uid>/`.
pub mod relation {
    /// Accounts that follow this user.
    pub const FOLLOWERS: &str = "followers";
    /// Accounts this user follows.
    pub const FOLLOWING: &str = "following";
    /// Accounts this user has muted.
    pub const MUTED: &str = "muted";
    /// Outstanding follow requests awaiting approval.
    pub const PENDING: &str = "pending";
    /// Actors hidden from this user's timeline without a full mute.
    pub const HIDDEN: &str = "hidden";
    /// Actors this user has "limited" (drop boosts from).
    pub const LIMITED: &str = "limited";
    /// Pinned posts.
    pub const PINNED: &str = "pinned";
    /// Bookmarked posts.
    pub const BOOKMARK: &str = "bookmark";
    /// Draft posts.
    pub const DRAFT: &str = "draft";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_paths_shard_by_first_two_hex_chars() {
        let base = Basedir::new("/data");
        let digest = "0123456789abcdef0123456789abcdef";
        assert_eq!(
            base.object_json(digest),
            PathBuf::from("/data/object/01/0123456789abcdef0123456789abcdef.json")
        );
        assert_eq!(
            base.object_index(digest, IndexKind::Children),
            PathBuf::from("/data/object/01/0123456789abcdef0123456789abcdef_c.idx")
        );
    }

    #[test]
    fn user_paths_nest_under_user_uid() {
        let base = Basedir::new("/data");
        assert_eq!(base.user_json("alice"), PathBuf::from("/data/user/alice/user.json"));
        assert_eq!(
            base.user_relation_dir("alice", relation::FOLLOWERS),
            PathBuf::from("/data/user/alice/followers")
        );
    }
}
