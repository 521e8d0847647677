use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use crate::error::{Error, Result};

/// Current wall-clock time truncated to the millisecond precision we persist.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Fixed-width RFC3339 form; lexicographic order matches chronological order.
pub fn format(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("invalid timestamp '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formatted_timestamps_sort_chronologically() {
        let a = Utc.with_ymd_and_hms(2024, 1, 9, 23, 59, 59).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert!(format(&a) < format(&b));
        assert_eq!(format(&b), "2024-01-10T00:00:00.000Z");
        assert_eq!(parse(&format(&a)).unwrap(), a);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse("yesterday").is_err());
    }
}
