//! Instance-wide state: server configuration, the shared-inbox set, the
//! instance-block set, and the global public timeline (spec §4.2).

use std::fs;

use snac_common::config::ServerConfig;
use snac_common::digest::md5_hex;
use snac_common::error::AppResult;

use crate::index;
use crate::layout::Basedir;

/// Handle onto one instance's global (non-per-user) state.
#[derive(Debug, Clone)]
pub struct InstanceStore {
    base: Basedir,
}

impl InstanceStore {
    #[must_use]
    pub fn new(base: Basedir) -> Self {
        Self { base }
    }

    /// Load `server.json`, failing on a `layout` version mismatch.
    pub fn load_config(&self) -> AppResult<ServerConfig> {
        ServerConfig::load(self.base.root())
    }

    /// Persist `server.json`.
    pub fn save_config(&self, config: &ServerConfig) -> AppResult<()> {
        config.save(self.base.root())
    }

    /// Record `host` as reachable via a shared inbox.
    pub fn shared_inbox_add(&self, host: &str) -> AppResult<()> {
        let path = self.base.shared_inbox_entry(&md5_hex(host));
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, host.as_bytes())?;
        Ok(())
    }

    /// Whether `host` is known to expose a shared inbox.
    #[must_use]
    pub fn shared_inbox_contains(&self, host: &str) -> bool {
        self.base.shared_inbox_entry(&md5_hex(host)).exists()
    }

    /// Every known shared-inbox host.
    pub fn shared_inbox_hosts(&self) -> AppResult<Vec<String>> {
        read_entries(&self.base.shared_inbox_dir())
    }

    /// Block an instance by hostname.
    pub fn block_add(&self, host: &str) -> AppResult<()> {
        let path = self.base.block_entry(&md5_hex(host));
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, host.as_bytes())?;
        Ok(())
    }

    /// Unblock an instance by hostname. Missing entries are a no-op.
    pub fn block_remove(&self, host: &str) -> AppResult<()> {
        match fs::remove_file(self.base.block_entry(&md5_hex(host))) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether `host` is blocked.
    #[must_use]
    pub fn is_blocked(&self, host: &str) -> bool {
        self.base.block_entry(&md5_hex(host)).exists()
    }

    /// Every blocked host.
    pub fn blocked_hosts(&self) -> AppResult<Vec<String>> {
        read_entries(&self.base.block_dir())
    }

    /// Append a digest to the instance-wide public timeline.
    pub fn public_timeline_add(&self, digest: &str) -> AppResult<()> {
        index::append(&self.base.public_timeline(), digest)
    }

    /// Tombstone a digest out of the instance-wide public timeline.
    pub fn public_timeline_remove(&self, digest: &str) -> AppResult<()> {
        index::tombstone(&self.base.public_timeline(), digest)
    }

    /// Paginate the instance-wide public timeline, newest first.
    pub fn public_timeline(&self, skip: usize, n: usize) -> AppResult<Vec<String>> {
        index::last_n(&self.base.public_timeline(), skip, n)
    }
}

fn read_entries(dir: &std::path::Path) -> AppResult<Vec<String>> {
    let Ok(read_dir) = fs::read_dir(dir) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for entry in read_dir {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            out.push(String::from_utf8_lossy(&fs::read(entry.path())?).into_owned());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> (tempfile::TempDir, InstanceStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = InstanceStore::new(Basedir::new(dir.path()));
        (dir, store)
    }

    #[test]
    fn shared_inbox_add_and_contains() {
        let (_dir, store) = instance();
        assert!(!store.shared_inbox_contains("remote.example"));
        store.shared_inbox_add("remote.example").unwrap();
        assert!(store.shared_inbox_contains("remote.example"));
        assert_eq!(store.shared_inbox_hosts().unwrap(), vec!["remote.example".to_string()]);
    }

    #[test]
    fn block_add_remove_round_trips() {
        let (_dir, store) = instance();
        store.block_add("bad.example").unwrap();
        assert!(store.is_blocked("bad.example"));
        store.block_remove("bad.example").unwrap();
        assert!(!store.is_blocked("bad.example"));
    }

    #[test]
    fn public_timeline_add_and_paginate() {
        let (_dir, store) = instance();
        store.public_timeline_add(&md5_hex("a")).unwrap();
        store.public_timeline_add(&md5_hex("b")).unwrap();
        assert_eq!(store.public_timeline(0, 10).unwrap(), vec![md5_hex("b"), md5_hex("a")]);
    }
}
