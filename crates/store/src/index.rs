//! Flat-file digest indices (`_c`, `_p`, `_l`, `_a`, `public.idx`, etc.).
//!
//! Each index is a sequence of fixed-width records: 32 hex characters plus a
//! trailing newline. Appending is serialized by a single process-wide
//! [`std::sync::Mutex`] plus an advisory `flock` (exclusive for writers,
//! shared for readers) on the file itself, so the scheme is safe both across
//! threads in this process and across cooperating processes on the same
//! host. Deletion never shrinks the file: it overwrites the record's first
//! byte with `-`, turning it into a tombstone that readers skip and that a
//! later compaction pass removes. The fixed width is what makes "first
//! entry" and "Nth-from-end" O(1) seeks instead of an O(n) scan.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use fs2::FileExt;
use snac_common::digest::{DIGEST_HEX_LEN, is_md5_hex};
use snac_common::error::{AppError, AppResult};

/// Width of one record: the digest plus its trailing newline.
const RECORD_LEN: usize = DIGEST_HEX_LEN + 1;

/// Single process-wide lock serializing all index writes, matching spec §4.1's
/// "Appending is serialized through a single process-wide mutex plus an
/// advisory exclusive file lock".
static WRITE_LOCK: Mutex<()> = Mutex::new(());

/// Append `digest` to the index at `path`, creating the file if needed.
pub fn append(path: &Path, digest: &str) -> AppResult<()> {
    if !is_md5_hex(digest) {
        return Err(AppError::Validation(format!("not a valid digest: {digest}")));
    }

    let _guard = WRITE_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.lock_exclusive()?;

    let result = (|| -> AppResult<()> {
        writeln!(file, "{digest}")?;
        file.sync_all()?;
        Ok(())
    })();

    let _ = FileExt::unlock(&file);
    result
}

/// Whether `digest` appears as a live (non-tombstoned) entry.
pub fn contains(path: &Path, digest: &str) -> AppResult<bool> {
    Ok(read_all(path)?.iter().any(|d| d == digest))
}

/// Read every live entry, in append order, skipping tombstones.
pub fn read_all(path: &Path) -> AppResult<Vec<String>> {
    let Ok(mut file) = File::open(path) else {
        return Ok(Vec::new());
    };
    file.lock_shared()?;
    let mut buf = Vec::new();
    let result = file.read_to_end(&mut buf);
    let _ = FileExt::unlock(&file);
    result?;

    Ok(parse_records(&buf)
        .into_iter()
        .filter(|(live, _)| *live)
        .map(|(_, d)| d)
        .collect())
}

/// Tombstone the first live occurrence of `digest` (idempotent: a
/// already-tombstoned or absent entry is a no-op, matching `unadmire`'s
/// idempotence requirement).
pub fn tombstone(path: &Path, digest: &str) -> AppResult<()> {
    let _guard = WRITE_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

    let Ok(mut file) = OpenOptions::new().read(true).write(true).open(path) else {
        return Ok(());
    };
    file.lock_exclusive()?;

    let result = (|| -> AppResult<()> {
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut offset = 0usize;
        while offset + RECORD_LEN <= buf.len() {
            let record = &buf[offset..offset + RECORD_LEN];
            if record[0] != b'-' && &record[..DIGEST_HEX_LEN] == digest.as_bytes() {
                file.seek(SeekFrom::Start(offset as u64))?;
                file.write_all(b"-")?;
                file.sync_all()?;
                break;
            }
            offset += RECORD_LEN;
        }
        Ok(())
    })();

    let _ = FileExt::unlock(&file);
    result
}

/// Rewrite the index without tombstones, compacting disk usage.
pub fn compact(path: &Path) -> AppResult<()> {
    let _guard = WRITE_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

    let Ok(mut file) = OpenOptions::new().read(true).write(true).open(path) else {
        return Ok(());
    };
    file.lock_exclusive()?;

    let result = (|| -> AppResult<()> {
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        let live: Vec<String> = parse_records(&buf)
            .into_iter()
            .filter(|(live, _)| *live)
            .map(|(_, d)| d)
            .collect();

        let mut out = Vec::with_capacity(live.len() * RECORD_LEN);
        for d in &live {
            out.extend_from_slice(d.as_bytes());
            out.push(b'\n');
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&out)?;
        file.sync_all()?;
        Ok(())
    })();

    let _ = FileExt::unlock(&file);
    result
}

/// The first live entry, in append order (oldest).
pub fn first(path: &Path) -> AppResult<Option<String>> {
    Ok(read_all(path)?.into_iter().next())
}

/// Up to `n` live entries counting back from the newest (append order
/// reversed), skipping `skip` live entries first. Used for reverse-chronological
/// timeline pagination without a secondary index.
pub fn last_n(path: &Path, skip: usize, n: usize) -> AppResult<Vec<String>> {
    let mut all = read_all(path)?;
    all.reverse();
    Ok(all.into_iter().skip(skip).take(n).collect())
}

/// Number of live entries.
pub fn count(path: &Path) -> AppResult<usize> {
    Ok(read_all(path)?.len())
}

fn parse_records(buf: &[u8]) -> Vec<(bool, String)> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    while offset + RECORD_LEN <= buf.len() {
        let record = &buf[offset..offset + RECORD_LEN];
        let live = record[0] != b'-';
        if let Ok(s) = std::str::from_utf8(&record[..DIGEST_HEX_LEN]) {
            out.push((live, s.to_string()));
        }
        offset += RECORD_LEN;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use snac_common::digest::md5_hex;

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x_c.idx");
        let a = md5_hex("a");
        let b = md5_hex("b");
        append(&path, &a).unwrap();
        append(&path, &b).unwrap();
        assert_eq!(read_all(&path).unwrap(), vec![a, b]);
    }

    #[test]
    fn tombstone_hides_entry_but_keeps_others() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x_l.idx");
        let a = md5_hex("a");
        let b = md5_hex("b");
        append(&path, &a).unwrap();
        append(&path, &b).unwrap();
        tombstone(&path, &a).unwrap();
        assert_eq!(read_all(&path).unwrap(), vec![b.clone()]);
        assert!(!contains(&path, &a).unwrap());
        assert!(contains(&path, &b).unwrap());
    }

    #[test]
    fn tombstone_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x_l.idx");
        let a = md5_hex("a");
        append(&path, &a).unwrap();
        tombstone(&path, &a).unwrap();
        tombstone(&path, &a).unwrap();
        assert_eq!(read_all(&path).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn compact_removes_tombstones_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x_c.idx");
        let a = md5_hex("a");
        let b = md5_hex("b");
        append(&path, &a).unwrap();
        append(&path, &b).unwrap();
        tombstone(&path, &a).unwrap();
        compact(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), RECORD_LEN);
        assert_eq!(read_all(&path).unwrap(), vec![b]);
    }

    #[test]
    fn last_n_returns_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pub.idx");
        let a = md5_hex("a");
        let b = md5_hex("b");
        let c = md5_hex("c");
        append(&path, &a).unwrap();
        append(&path, &b).unwrap();
        append(&path, &c).unwrap();
        assert_eq!(last_n(&path, 0, 2).unwrap(), vec![c, b]);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.idx");
        assert_eq!(read_all(&path).unwrap(), Vec::<String>::new());
        assert_eq!(first(&path).unwrap(), None);
    }
}
