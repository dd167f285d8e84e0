//! Top-level timeline filtering (spec §4.1 supplement, grounded in `snac`'s
//! `timeline_top_level`/`timeline_simple_list`): a timeline normally shows
//! root posts, not every reply in a thread it happens to know about.

use snac_common::error::AppResult;

use crate::object::ObjectStore;

/// Keep only digests whose post has no parent, or whose parent is not known
/// locally (so an orphaned reply still surfaces as if it were top-level).
pub fn top_level(store: &ObjectStore, digests: Vec<String>) -> AppResult<Vec<String>> {
    let mut out = Vec::with_capacity(digests.len());
    for digest in digests {
        let obj = store.get_by_md5(&digest)?;
        let Some(id) = ObjectStore::stored_id(&obj) else {
            continue;
        };
        match store.parent(id)? {
            None => out.push(digest),
            Some(parent_digest) => {
                if !store.exists_by_md5(&parent_digest) {
                    out.push(digest);
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Basedir;
    use serde_json::json;
    use snac_common::digest::md5_hex;

    #[test]
    fn keeps_posts_with_no_parent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(Basedir::new(dir.path()));
        store.put("https://x/notes/1", &json!({"id": "https://x/notes/1", "type": "Note"}), false).unwrap();
        let digests = vec![md5_hex("https://x/notes/1")];
        assert_eq!(top_level(&store, digests.clone()).unwrap(), digests);
    }

    #[test]
    fn drops_replies_whose_parent_is_known() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(Basedir::new(dir.path()));
        store.put("https://x/notes/1", &json!({"id": "https://x/notes/1", "type": "Note"}), false).unwrap();
        store
            .put(
                "https://x/notes/2",
                &json!({"id": "https://x/notes/2", "type": "Note", "inReplyTo": "https://x/notes/1"}),
                false,
            )
            .unwrap();

        let digests = vec![md5_hex("https://x/notes/1"), md5_hex("https://x/notes/2")];
        assert_eq!(top_level(&store, digests).unwrap(), vec![md5_hex("https://x/notes/1")]);
    }

    #[test]
    fn keeps_orphaned_reply_whose_parent_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(Basedir::new(dir.path()));
        store
            .put(
                "https://x/notes/2",
                &json!({"id": "https://x/notes/2", "type": "Note", "inReplyTo": "https://remote/notes/9"}),
                false,
            )
            .unwrap();

        let digests = vec![md5_hex("https://x/notes/2")];
        assert_eq!(top_level(&store, digests.clone()).unwrap(), digests);
    }
}
