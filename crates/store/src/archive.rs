//! Archival of queue items that exhausted their retries or were rejected
//! outright, under `<basedir>/error/` (spec §4.4/§4.5).

use std::fs;

use chrono::Utc;
use snac_common::error::AppResult;
use snac_common::fsio::atomic_write;

use crate::layout::Basedir;

/// Handle onto the instance's error archive.
#[derive(Debug, Clone)]
pub struct Archive {
    base: Basedir,
}

impl Archive {
    #[must_use]
    pub fn new(base: Basedir) -> Self {
        Self { base }
    }

    /// Archive `body` (the original queue item or raw inbox payload) under
    /// `error/<timestamp>_<tag>.json`, for later operator inspection.
    pub fn record(&self, tag: &str, body: &[u8]) -> AppResult<()> {
        let ts = Utc::now().format("%Y%m%d%H%M%S");
        let filename = format!("{ts}_{tag}.json");
        atomic_write(&self.base.error_dir().join(filename), body)
    }

    /// Every archived filename, oldest first (they already sort
    /// lexicographically by timestamp prefix).
    pub fn entries(&self) -> AppResult<Vec<String>> {
        let dir = self.base.error_dir();
        let Ok(read_dir) = fs::read_dir(&dir) else {
            return Ok(Vec::new());
        };
        let mut names = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_writes_a_timestamped_file() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::new(Basedir::new(dir.path()));
        archive.record("signature-verify-failed", b"{}").unwrap();
        let entries = archive.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].ends_with("_signature-verify-failed.json"));
    }
}
