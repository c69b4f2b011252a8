//! Minute-precision backup timestamps and "time ago" labels.
//!
//! The format is fixed-width and zero-padded, so lexicographic order of two
//! timestamps is also their chronological order.

use chrono::{Duration, Local, NaiveDateTime};

/// `yyyy.MM.dd_HH.mm`
pub const TIMESTAMP_FORMAT: &str = "%Y.%m.%d_%H.%M";

pub const UNKNOWN_TIME_LABEL: &str = "Backup (unknown time)";

/// Current local wall-clock time.
pub fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub fn format_timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a backup timestamp. Anything other than the exact fixed format is rejected.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if raw.len() != 16 {
        return None;
    }
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).ok()
}

/// Render the label for a backup taken `elapsed` ago.
///
/// Under one minute (including negative skew) is "just now"; otherwise the
/// non-zero day/hour/minute components are listed.
pub fn describe_elapsed(elapsed: Duration) -> String {
    if elapsed.num_minutes() < 1 {
        return "Backup just now".to_string();
    }

    let days = elapsed.num_days();
    let hours = elapsed.num_hours() % 24;
    let minutes = elapsed.num_minutes() % 60;

    let parts: Vec<String> = [(days, "day"), (hours, "hour"), (minutes, "minute")]
        .into_iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| {
            if value > 1 {
                format!("{} {}s", value, unit)
            } else {
                format!("{} {}", value, unit)
            }
        })
        .collect();

    format!("Backup {} ago", parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn test_format_is_zero_padded() {
        assert_eq!(format_timestamp(at(2024, 3, 7, 9, 5)), "2024.03.07_09.05");
    }

    #[test]
    fn test_parse_roundtrip_and_rejects() {
        assert_eq!(parse_timestamp("2024.03.07_09.05"), Some(at(2024, 3, 7, 9, 5)));
        assert_eq!(parse_timestamp("2024.3.7_9.5"), None);
        assert_eq!(parse_timestamp("2024-03-07_09.05"), None);
        assert_eq!(parse_timestamp("garbage"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_lexicographic_order_matches_time() {
        let earlier = format_timestamp(at(2023, 12, 31, 23, 59));
        let later = format_timestamp(at(2024, 1, 1, 0, 0));
        assert!(earlier < later);
    }

    #[test]
    fn test_describe_elapsed() {
        assert_eq!(describe_elapsed(Duration::zero()), "Backup just now");
        assert_eq!(describe_elapsed(Duration::seconds(59)), "Backup just now");
        assert_eq!(describe_elapsed(Duration::minutes(-3)), "Backup just now");
        assert_eq!(describe_elapsed(Duration::minutes(1)), "Backup 1 minute ago");
        assert_eq!(describe_elapsed(Duration::minutes(5)), "Backup 5 minutes ago");
        assert_eq!(describe_elapsed(Duration::hours(2)), "Backup 2 hours ago");
        assert_eq!(
            describe_elapsed(Duration::days(1) + Duration::minutes(5)),
            "Backup 1 day 5 minutes ago"
        );
        assert_eq!(
            describe_elapsed(Duration::days(1) + Duration::hours(3)),
            "Backup 1 day 3 hours ago"
        );
        assert_eq!(
            describe_elapsed(Duration::days(3) + Duration::hours(1) + Duration::minutes(2)),
            "Backup 3 days 1 hour 2 minutes ago"
        );
    }
}
