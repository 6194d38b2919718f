//! Timestamp conversions for scanned files and stored rows

use chrono::{DateTime, Utc};

/// Convert a filesystem timestamp into UTC
pub fn from_system_time(t: std::time::SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(t)
}

/// Parse an RFC 3339 timestamp read from `column`
pub fn parse_rfc3339(column: &'static str, s: &str) -> crate::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::Error::corrupt(column, s, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_from_system_time() {
        let t = UNIX_EPOCH + Duration::from_secs(1_000_000);
        assert_eq!(from_system_time(t).timestamp(), 1_000_000);
    }

    #[test]
    fn test_parse_rfc3339() {
        let ts = Utc::now();
        assert_eq!(parse_rfc3339("modified_at", &ts.to_rfc3339()).unwrap(), ts);

        let err = parse_rfc3339("modified_at", "yesterday").unwrap_err();
        assert!(matches!(err, crate::Error::CorruptColumn { column: "modified_at", .. }));
    }
}
