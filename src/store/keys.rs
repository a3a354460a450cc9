use chrono::{DateTime, NaiveDateTime, Utc};

pub const READINGS_PREFIX: &str = "readings/";

const KEY_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const KEY_DATE_FORMAT: &str = "%Y-%m-%d";
const LEGACY_KEY_FORMAT: &str = "%Y/%m/%d/%H-%M";

/// Identity of one reading object: `readings/{date}/{venue_ref}_{timestamp}.json`.
///
/// Venue and second-precision timestamp make the key unique per observation.
/// Date and timestamp are UTC.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReadingKey {
    pub timestamp: DateTime<Utc>,
    pub venue_ref: String,
}

impl ReadingKey {
    pub fn new(venue_ref: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            venue_ref: venue_ref.into(),
        }
    }

    pub fn to_key(&self) -> String {
        format!(
            "{}{}_{}.json",
            date_prefix(self.timestamp),
            self.venue_ref,
            self.timestamp.format(KEY_TIMESTAMP_FORMAT)
        )
    }

    /// `None` for keys that do not follow the reading key scheme.
    pub fn parse(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(READINGS_PREFIX)?;
        let (date, file) = rest.split_once('/')?;
        let stem = file.strip_suffix(".json")?;
        // Place references may contain '_', the timestamp never does.
        let (venue_ref, stamp) = stem.rsplit_once('_')?;
        if venue_ref.is_empty() {
            return None;
        }

        let timestamp = NaiveDateTime::parse_from_str(stamp, KEY_TIMESTAMP_FORMAT)
            .ok()?
            .and_utc();
        if timestamp.format(KEY_DATE_FORMAT).to_string() != date {
            return None;
        }

        Some(Self::new(venue_ref, timestamp))
    }
}

/// Objects from the earlier collector: `readings/YYYY/MM/DD/HH-MM.json`.
///
/// Their names carry local time and no venue; only the body identifies the
/// reading.
pub fn is_legacy_key(key: &str) -> bool {
    key.strip_prefix(READINGS_PREFIX)
        .and_then(|rest| rest.strip_suffix(".json"))
        .is_some_and(|stem| NaiveDateTime::parse_from_str(stem, LEGACY_KEY_FORMAT).is_ok())
}

/// Listing prefix for all readings taken on the UTC date of `at`.
pub fn date_prefix(at: DateTime<Utc>) -> String {
    format!("{READINGS_PREFIX}{}/", at.format(KEY_DATE_FORMAT))
}
