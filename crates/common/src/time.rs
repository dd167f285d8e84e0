//! Time formatting shared by the signer and the message constructors.

use chrono::{DateTime, Utc};

/// Format `t` as an RFC 7231 HTTP-date, e.g. `Tue, 15 Nov 1994 08:12:31 GMT`,
/// as required by the `date` header signed in spec §4.2.
#[must_use]
pub fn http_date(t: DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Current time formatted as an HTTP-date.
#[must_use]
pub fn http_date_now() -> String {
    http_date(Utc::now())
}

/// Format `t` as ActivityStreams-canonical ISO-8601 UTC, e.g.
/// `2024-01-02T03:04:05Z`. Used wherever `msg_base`'s `date-tag == "@now"`.
#[must_use]
pub fn iso8601(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Current time formatted as ActivityStreams-canonical ISO-8601 UTC.
#[must_use]
pub fn iso8601_now() -> String {
    iso8601(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn http_date_matches_rfc7231_shape() {
        let t = Utc.with_ymd_and_hms(1994, 11, 15, 8, 12, 31).unwrap();
        assert_eq!(http_date(t), "Tue, 15 Nov 1994 08:12:31 GMT");
    }

    #[test]
    fn iso8601_ends_with_z() {
        let t = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(iso8601(t), "2024-01-02T03:04:05Z");
    }
}
