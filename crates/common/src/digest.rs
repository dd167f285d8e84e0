//! Content-addressing helpers.
//!
//! Every activity/actor/note is keyed by the hex MD5 digest of its canonical
//! `id` URL. This is not a cryptographic use of MD5 — it is a stable,
//! short, filesystem-friendly key, matching the on-disk layout in spec §6.

/// Number of hex characters in a digest (32 + null in the C original; here
/// just the 32 hex chars).
pub const DIGEST_HEX_LEN: usize = 32;

/// Compute the hex MD5 digest of a string (typically an object's `id` URL).
#[must_use]
pub fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// The two-hex-character shard prefix used for `object/<2hex>/` bucketing.
#[must_use]
pub fn shard_prefix(digest: &str) -> &str {
    &digest[0..2]
}

/// Whether `s` looks like a valid (non-tombstoned) hex digest of the expected length.
#[must_use]
pub fn is_md5_hex(s: &str) -> bool {
    s.len() == DIGEST_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}
