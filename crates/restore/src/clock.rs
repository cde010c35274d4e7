//! Timestamp helpers shared by jobs, reports and snapshot files.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// RFC 3339, as stored on job records.
pub fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

pub fn parse_rfc3339(s: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339).ok()
}

/// `2024-06-01 09:15:00 UTC`, for reports read by people.
pub fn human(at: OffsetDateTime) -> String {
    at.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second] UTC"
    ))
    .unwrap_or_else(|_| at.to_string())
}

/// `20240601T091500Z`, safe for file names and sortable.
pub fn compact(at: OffsetDateTime) -> String {
    at.format(format_description!(
        "[year][month][day]T[hour][minute][second]Z"
    ))
    .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn formats() {
        let at = datetime!(2024-06-01 09:15:00 UTC);
        assert_eq!(rfc3339(at), "2024-06-01T09:15:00Z");
        assert_eq!(human(at), "2024-06-01 09:15:00 UTC");
        assert_eq!(compact(at), "20240601T091500Z");
        assert_eq!(parse_rfc3339("2024-06-01T09:15:00Z"), Some(at));
    }
}
