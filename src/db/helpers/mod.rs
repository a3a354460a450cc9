use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Canonical TEXT form for timestamps: whole seconds with a `Z` suffix, so
/// string order matches time order in range queries.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field} '{value}'"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    value.map(|raw| parse_datetime(&raw, field)).transpose()
}

pub fn to_u8(value: i64, field: &str) -> Result<u8> {
    u8::try_from(value).map_err(|_| anyhow!("{field} value {value} does not fit in 0..=255"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

/// Wraps a conversion failure so it can leave a `query_map` row closure.
pub fn conversion_error(err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formatted_timestamps_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2024, 1, 28, 9, 5, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 28, 10, 0, 0).unwrap();

        assert_eq!(format_timestamp(early), "2024-01-28T09:05:00Z");
        assert!(format_timestamp(early) < format_timestamp(late));
        assert_eq!(parse_datetime(&format_timestamp(late), "ts").unwrap(), late);
    }

    #[test]
    fn narrow_conversions_reject_out_of_range() {
        assert_eq!(to_u8(23, "hour").unwrap(), 23);
        assert!(to_u8(300, "hour").is_err());
        assert!(to_u64(-1, "count").is_err());
    }
}
