//! Local password hashing for the CLI-only `resetpwd` flow (spec §6).
//!
//! Grounded in the original engine's `hash_password(uid, pwd, NULL)`: the uid
//! salts the hash so two users who happen to pick the same password never
//! collide on disk.

use sha2::{Digest, Sha256};

/// Hash `password`, salted with `uid`.
#[must_use]
pub fn hash_password(uid: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(uid.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_password_differs_by_uid() {
        assert_ne!(hash_password("alice", "hunter2"), hash_password("bob", "hunter2"));
    }

    #[test]
    fn hashing_is_deterministic() {
        assert_eq!(hash_password("alice", "hunter2"), hash_password("alice", "hunter2"));
    }
}
