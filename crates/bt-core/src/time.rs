//! Timestamp conventions shared by both stores.
//!
//! All timestamps are UTC, truncated to microseconds, and persisted as
//! fixed-width RFC 3339 strings so that string order is time order.

use chrono::{DateTime, Datelike, SecondsFormat, SubsecRound, TimeZone, Utc};

/// Current time at storage precision.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Truncate a caller-supplied timestamp to storage precision.
pub fn normalize(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

/// Whether `ts` formats as a four-digit year. Anything outside 0000-9999
/// gains a sign and breaks both parsing and string ordering.
pub fn is_storable(ts: &DateTime<Utc>) -> bool {
    (0..=9999).contains(&ts.year())
}

/// `0000-01-01T00:00:00Z`, the lower bound of [`is_storable`].
pub fn earliest_storable() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(0, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Format for persistence, e.g. `2026-03-01T08:15:00.000000Z`.
pub fn to_storage(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a persisted timestamp.
pub fn from_storage(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_format_sorts_chronologically() {
        let a = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let b = a + chrono::Duration::microseconds(1);
        let c = Utc.with_ymd_and_hms(2026, 11, 1, 9, 0, 0).unwrap();
        let (sa, sb, sc) = (to_storage(&a), to_storage(&b), to_storage(&c));
        assert_eq!(sa.len(), sc.len());
        assert!(sa < sb && sb < sc);
        assert_eq!(from_storage(&sb).unwrap(), b);
    }

    #[test]
    fn test_storable_years_are_four_digits() {
        let max = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
        let far = Utc.with_ymd_and_hms(12000, 1, 1, 0, 0, 0).unwrap();
        let before_zero = Utc.with_ymd_and_hms(-1, 1, 1, 0, 0, 0).unwrap();
        assert!(is_storable(&max));
        assert_eq!(from_storage(&to_storage(&max)).unwrap(), max);
        assert!(!is_storable(&far));
        assert!(!is_storable(&before_zero));
        assert!(from_storage(&to_storage(&far)).is_err());
        assert!(is_storable(&earliest_storable()));
    }

    #[test]
    fn test_normalize_drops_nanos() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(normalize(ts).timestamp_subsec_nanos(), 123_456_000);
    }
}
