//! Timestamp helpers for the manifest `time` map.

use chrono::{SecondsFormat, Utc};

/// Current time in the ISO-8601 millisecond form npm serves
/// (`2026-08-02T12:34:56.789Z`).
pub fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time as epoch milliseconds, used for `_uplinks[*].fetched`.
pub fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_now_shape() {
        let stamp = iso_now();
        assert!(stamp.ends_with('Z'));
        assert_eq!(stamp.len(), "2026-08-02T12:34:56.789Z".len());
    }

    #[test]
    fn test_iso_timestamps_sort_lexicographically() {
        let a = iso_now();
        let b = iso_now();
        assert!(a <= b);
    }
}
