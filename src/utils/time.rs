//! Time and timestamp utilities

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Current Unix timestamp in milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current time as RFC 3339 with millisecond precision
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The instant `hours` hours ago
pub fn hours_ago(hours: i64) -> DateTime<Utc> {
    Utc::now() - Duration::hours(hours)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc3339_parses_back() {
        let text = now_rfc3339();
        assert!(text.ends_with('Z'));
        assert!(DateTime::parse_from_rfc3339(&text).is_ok());
    }

    #[test]
    fn test_hours_ago_is_in_the_past() {
        assert!(hours_ago(24) < Utc::now());
        assert!(now_millis() > 1_600_000_000_000);
    }
}
