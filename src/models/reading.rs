//! Occupancy observation model.
//!
//! A `Reading` is created once per venue per cycle and never changes after
//! that. The same JSON shape is used for remote objects and API summaries.

use std::fmt;

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Crowd estimate on the source's 0–100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Popularity(u8);

impl Popularity {
    pub const MAX: u8 = 100;

    pub fn new(value: u8) -> Option<Self> {
        (value <= Self::MAX).then_some(Self(value))
    }

    /// Normalizes a raw source value: negatives are rejected, values above
    /// the scale are clamped to `MAX`.
    pub fn from_source(raw: i64) -> Option<Self> {
        if raw < 0 {
            return None;
        }
        Some(Self(raw.min(i64::from(Self::MAX)) as u8))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn level(self) -> LoadLevel {
        match self.0 {
            0..=29 => LoadLevel::Low,
            30..=59 => LoadLevel::Medium,
            _ => LoadLevel::High,
        }
    }
}

impl TryFrom<i64> for Popularity {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .and_then(Popularity::new)
            .ok_or_else(|| format!("popularity {value} outside 0..=100"))
    }
}

impl From<Popularity> for u8 {
    fn from(value: Popularity) -> Self {
        value.0
    }
}

impl fmt::Display for Popularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadLevel {
    Low,
    Medium,
    High,
}

/// One occupancy observation for one venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(alias = "place_id")]
    pub venue_ref: String,
    pub popularity: Option<Popularity>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Local weekday, Monday = 0.
    pub day_of_week: u8,
    /// Local hour of day.
    pub hour: u8,
    pub is_open: Option<bool>,
}

impl Reading {
    /// Builds a reading stamped at `at` (truncated to whole seconds), deriving
    /// weekday and hour in the venue's local offset.
    pub fn observe(
        venue_ref: impl Into<String>,
        popularity: Option<Popularity>,
        at: DateTime<Utc>,
        local_offset: FixedOffset,
        is_open: Option<bool>,
    ) -> Self {
        let timestamp = truncate_to_secs(at);
        let local = timestamp.with_timezone(&local_offset);
        Self {
            venue_ref: venue_ref.into(),
            popularity,
            timestamp,
            day_of_week: local.weekday().num_days_from_monday() as u8,
            hour: local.hour() as u8,
            is_open,
        }
    }
}

pub fn truncate_to_secs(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| truncate_to_secs(dt.with_timezone(&Utc)))
        .map_err(|err| serde::de::Error::custom(format!("invalid timestamp '{raw}': {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn jerusalem() -> FixedOffset {
        FixedOffset::east_opt(2 * 3600).unwrap()
    }

    #[test]
    fn source_values_are_clamped_into_scale() {
        assert_eq!(Popularity::from_source(130).unwrap().value(), 100);
        assert_eq!(Popularity::from_source(0).unwrap().value(), 0);
        assert!(Popularity::from_source(-4).is_none());
    }

    #[test]
    fn load_levels_follow_thresholds() {
        assert_eq!(Popularity::new(29).unwrap().level(), LoadLevel::Low);
        assert_eq!(Popularity::new(30).unwrap().level(), LoadLevel::Medium);
        assert_eq!(Popularity::new(59).unwrap().level(), LoadLevel::Medium);
        assert_eq!(Popularity::new(60).unwrap().level(), LoadLevel::High);
        assert!(Popularity::new(101).is_none());
    }

    #[test]
    fn observe_derives_local_weekday_and_hour() {
        // Sunday 23:30 UTC is Monday 01:30 in UTC+2.
        let at = Utc.with_ymd_and_hms(2024, 1, 28, 23, 30, 15).unwrap()
            + chrono::Duration::milliseconds(750);
        let reading = Reading::observe("venue", Popularity::new(40), at, jerusalem(), Some(true));

        assert_eq!(reading.timestamp, Utc.with_ymd_and_hms(2024, 1, 28, 23, 30, 15).unwrap());
        assert_eq!(reading.day_of_week, 0);
        assert_eq!(reading.hour, 1);
    }

    #[test]
    fn legacy_objects_are_accepted() {
        let raw = r#"{
            "timestamp": "2024-01-28T14:30:12.345678+02:00",
            "place_id": "ChIJy8LxJaZGHRURzNVZXycuQnw",
            "popularity": 42,
            "day_of_week": 6,
            "hour": 14,
            "is_open": true
        }"#;
        let reading: Reading = serde_json::from_str(raw).unwrap();

        assert_eq!(reading.venue_ref, "ChIJy8LxJaZGHRURzNVZXycuQnw");
        assert_eq!(reading.timestamp, Utc.with_ymd_and_hms(2024, 1, 28, 12, 30, 12).unwrap());
        assert_eq!(reading.popularity, Popularity::new(42));
    }

    #[test]
    fn out_of_range_popularity_is_rejected_on_read() {
        let raw = r#"{"venue_ref":"v","popularity":140,"timestamp":"2024-01-28T12:00:00Z",
                      "day_of_week":6,"hour":14,"is_open":null}"#;
        assert!(serde_json::from_str::<Reading>(raw).is_err());
    }
}
