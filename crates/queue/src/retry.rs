//! Retry/backoff policy for `output` items (spec §4.4).

use snac_common::config::ServerConfig;

/// Placeholder status used for a transport timeout / connection-closed
/// failure, matching the "599/client-closed" code named by the spec.
pub const TIMEOUT_STATUS: i32 = 599;

/// HTTP statuses that are never retried.
const FATAL_STATUSES: &[i32] = &[400, 404, 405, 410, 422];

/// Whether `status` should drop the item immediately rather than retry.
/// Negative codes are transport failures reported with no HTTP status at all.
#[must_use]
pub fn is_fatal(status: i32) -> bool {
    status < 0 || FATAL_STATUSES.contains(&status)
}

/// Seconds until the next attempt is eligible: `retries * queue_retry_minutes * 60`.
#[must_use]
pub fn backoff_seconds(config: &ServerConfig, retries: u32) -> i64 {
    i64::from(retries) * i64::from(config.queue_retry_minutes) * 60
}

/// Attempt count after a failed delivery whose previous status was `previous_status`.
/// A repeated timeout is penalized by bumping `retries` twice instead of once.
#[must_use]
pub fn next_retries(previous_status: i32, retries: u32) -> u32 {
    if previous_status == TIMEOUT_STATUS {
        retries + 2
    } else {
        retries + 1
    }
}

/// The request timeout to use for this attempt: escalated after a prior timeout.
#[must_use]
pub fn timeout_seconds(config: &ServerConfig, previous_status: i32) -> u64 {
    if previous_status == TIMEOUT_STATUS {
        config.queue_timeout_2
    } else {
        config.queue_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        let mut c = ServerConfig::new("example.com".to_string());
        c.queue_retry_minutes = 2;
        c.queue_timeout = 6;
        c.queue_timeout_2 = 8;
        c
    }

    #[test]
    fn fatal_statuses_are_not_retried() {
        assert!(is_fatal(404));
        assert!(is_fatal(410));
        assert!(is_fatal(-1));
        assert!(!is_fatal(500));
        assert!(!is_fatal(599));
    }

    #[test]
    fn backoff_scales_linearly_with_retries() {
        let c = config();
        assert_eq!(backoff_seconds(&c, 0), 0);
        assert_eq!(backoff_seconds(&c, 3), 360);
    }

    #[test]
    fn repeated_timeout_doubles_the_retry_penalty() {
        assert_eq!(next_retries(TIMEOUT_STATUS, 1), 3);
        assert_eq!(next_retries(500, 1), 2);
    }

    #[test]
    fn timeout_escalates_after_a_prior_timeout() {
        let c = config();
        assert_eq!(timeout_seconds(&c, 0), 6);
        assert_eq!(timeout_seconds(&c, TIMEOUT_STATUS), 8);
    }
}
