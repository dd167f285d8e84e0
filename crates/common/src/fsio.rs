//! Durable file writes.
//!
//! Every write that must survive a crash uses the same pattern named in
//! spec §5: write a temp file in the target's directory, `fsync` it, then
//! rename it over the target. A crash can only ever leave the old file or
//! the fully-written new one, never a truncated write.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::AppResult;

/// Atomically (write tmp; fsync; rename) write `bytes` to `path`.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> AppResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut file = tmp.as_file();
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    tmp.persist(path)
        .map_err(|e| crate::error::AppError::LocalIo(e.to_string()))?;

    if let Ok(dir_file) = File::open(dir) {
        let _ = dir_file.sync_all();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_creates_parent_dirs_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.json");
        atomic_write(&path, b"hello").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn atomic_write_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
    }
}
