//! Persistence for catalog, quiz and learning data
//!
//! All timestamps are stored as fixed-width RFC 3339 strings (UTC, nanosecond
//! precision) so range filters can compare them lexicographically.

mod sqlite;

pub use sqlite::{SatisfactionUpdate, SatisfactionWrite, SqliteStore, StoreStats};

use chrono::{DateTime, SecondsFormat, Utc};

pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamps_sort_lexicographically() {
        let early = Utc.with_ymd_and_hms(2024, 1, 9, 23, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 10, 1, 0, 0).unwrap();
        assert!(format_ts(&early) < format_ts(&late));
        assert_eq!(parse_ts(&format_ts(&late)).unwrap(), late);
    }

    #[test]
    fn test_sub_microsecond_precision_survives() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 10, 1, 0, 0).unwrap() + chrono::Duration::nanoseconds(237_923_604);
        let raw = format_ts(&ts);
        assert_eq!(raw, "2024-01-10T01:00:00.237923604Z");
        assert_eq!(parse_ts(&raw).unwrap(), ts);

        let whole = Utc.with_ymd_and_hms(2024, 1, 10, 1, 0, 0).unwrap();
        assert_eq!(format_ts(&whole).len(), raw.len());
    }
}
