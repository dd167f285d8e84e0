//! Instance configuration (`server.json`) and base-directory resolution.
//!
//! Unlike the teacher's layered TOML + `MISSKEY_` environment config, the
//! instance configuration here is the single on-disk `server.json` document
//! named by spec §6 — there is no database connection string or Redis URL to
//! layer in. `dotenvy` is kept for the one ambient knob every subcommand
//! needs: which base directory to operate on.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// The on-disk layout version this binary understands. A mismatch with the
/// `layout` field stored in an existing `server.json` is a fatal startup
/// error (spec §6: "a mismatch forces an offline upgrade before startup").
pub const CURRENT_LAYOUT: u32 = 1;

/// Instance configuration, persisted as `<basedir>/server.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// On-disk format version.
    #[serde(default = "default_layout")]
    pub layout: u32,
    /// Public hostname of this instance.
    pub host: String,
    /// URL path prefix (usually empty).
    #[serde(default)]
    pub prefix: String,
    /// Bind address for the HTTP listener.
    #[serde(default = "default_address")]
    pub address: String,
    /// Bind port for the HTTP listener.
    #[serde(default = "default_port")]
    pub port: u16,
    /// `http` or `https`; used when building canonical URLs.
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Minutes multiplied by retry count for `output` backoff.
    #[serde(default = "default_queue_retry_minutes")]
    pub queue_retry_minutes: u32,
    /// Maximum delivery attempts before an `output` item is dropped.
    #[serde(default = "default_queue_retry_max")]
    pub queue_retry_max: u32,
    /// Base HTTP timeout, in seconds.
    #[serde(default = "default_queue_timeout")]
    pub queue_timeout: u64,
    /// Escalated HTTP timeout after a prior timeout, in seconds.
    #[serde(default = "default_queue_timeout_2")]
    pub queue_timeout_2: u64,
    /// Cap on timeline index length before trimming.
    #[serde(default = "default_max_timeline_entries")]
    pub max_timeline_entries: u64,
    /// Days after which non-local timeline entries are purged (0 disables).
    #[serde(default)]
    pub timeline_purge_days: u64,
    /// Days after which local posts are purged (0 disables).
    #[serde(default)]
    pub local_purge_days: u64,
    /// Minimum account age, in seconds, required for a remote actor's posts
    /// to be accepted (0 disables).
    #[serde(default)]
    pub min_account_age: u64,
    /// Whether to collect and reuse other instances' shared inboxes.
    #[serde(default = "default_true")]
    pub shared_inboxes: bool,
    /// Disables adding discovered shared inboxes to the instance-wide set.
    #[serde(default)]
    pub disable_inbox_collection: bool,
    /// Disables the email notification sink.
    #[serde(default)]
    pub disable_email_notifications: bool,
}

const fn default_layout() -> u32 {
    CURRENT_LAYOUT
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    3000
}

fn default_protocol() -> String {
    "https".to_string()
}

const fn default_queue_retry_minutes() -> u32 {
    2
}

const fn default_queue_retry_max() -> u32 {
    10
}

const fn default_queue_timeout() -> u64 {
    6
}

const fn default_queue_timeout_2() -> u64 {
    8
}

const fn default_max_timeline_entries() -> u64 {
    200
}

const fn default_true() -> bool {
    true
}

impl ServerConfig {
    /// Construct a fresh default configuration for `init`.
    #[must_use]
    pub fn new(host: String) -> Self {
        Self {
            layout: CURRENT_LAYOUT,
            host,
            prefix: String::new(),
            address: default_address(),
            port: default_port(),
            protocol: default_protocol(),
            queue_retry_minutes: default_queue_retry_minutes(),
            queue_retry_max: default_queue_retry_max(),
            queue_timeout: default_queue_timeout(),
            queue_timeout_2: default_queue_timeout_2(),
            max_timeline_entries: default_max_timeline_entries(),
            timeline_purge_days: 120,
            local_purge_days: 0,
            min_account_age: 0,
            shared_inboxes: true,
            disable_inbox_collection: false,
            disable_email_notifications: false,
        }
    }

    /// The instance base URL, e.g. `https://example.com` or
    /// `https://example.com/prefix`.
    #[must_use]
    pub fn base_url(&self) -> String {
        if self.prefix.is_empty() {
            format!("{}://{}", self.protocol, self.host)
        } else {
            format!("{}://{}/{}", self.protocol, self.host, self.prefix)
        }
    }

    /// Load `server.json` from a base directory, checking the layout version.
    pub fn load(basedir: &Path) -> AppResult<Self> {
        let path = basedir.join("server.json");
        let bytes = std::fs::read(&path)
            .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::Config(format!("cannot parse {}: {e}", path.display())))?;

        if config.layout != CURRENT_LAYOUT {
            return Err(AppError::Config(format!(
                "on-disk layout {} does not match supported layout {CURRENT_LAYOUT}; run `upgrade`",
                config.layout
            )));
        }

        Ok(config)
    }

    /// Persist `server.json` atomically (temp file + rename) into a base directory.
    pub fn save(&self, basedir: &Path) -> AppResult<()> {
        let path = basedir.join("server.json");
        let body = serde_json::to_vec_pretty(self)?;
        crate::fsio::atomic_write(&path, &body)
    }
}

/// Resolve the base directory for a CLI invocation: an explicit argument
/// takes precedence, otherwise `SNAC_BASEDIR`, otherwise the current directory.
#[must_use]
pub fn resolve_basedir(explicit: Option<&str>) -> PathBuf {
    if let Some(p) = explicit {
        return PathBuf::from(p);
    }
    if let Ok(p) = std::env::var("SNAC_BASEDIR") {
        return PathBuf::from(p);
    }
    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_without_prefix() {
        let cfg = ServerConfig::new("example.com".to_string());
        assert_eq!(cfg.base_url(), "https://example.com");
    }

    #[test]
    fn base_url_with_prefix() {
        let mut cfg = ServerConfig::new("example.com".to_string());
        cfg.prefix = "social".to_string();
        assert_eq!(cfg.base_url(), "https://example.com/social");
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ServerConfig::new("example.com".to_string());
        cfg.save(dir.path()).unwrap();
        let loaded = ServerConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.host, "example.com");
        assert_eq!(loaded.layout, CURRENT_LAYOUT);
    }

    #[test]
    fn rejects_mismatched_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = ServerConfig::new("example.com".to_string());
        cfg.layout = CURRENT_LAYOUT + 1;
        cfg.save(dir.path()).unwrap();
        assert!(ServerConfig::load(dir.path()).is_err());
    }
}
