//! Static list of monitored venues.
//!
//! The catalog is built once from configuration and never mutated by the
//! cycle. Operating hours are evaluated in the catalog's fixed local offset.

mod hours;

pub use hours::{DayHours, WeeklyHours};

use anyhow::{bail, Result};
use chrono::{DateTime, FixedOffset, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Offset used when the configuration does not name one (UTC+2).
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 120;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub place_ref: String,
    pub name: String,
    #[serde(default)]
    pub name_localized: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub hours: Option<WeeklyHours>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Venue {
    /// Minimal entry for a venue known only by its place reference.
    pub fn bare(place_ref: impl Into<String>) -> Self {
        let place_ref = place_ref.into();
        Self {
            name: place_ref.clone(),
            place_ref,
            name_localized: None,
            address: None,
            hours: None,
            active: true,
        }
    }

    /// `None` when no hours are defined for the local weekday of `at`.
    pub fn is_open_at(&self, at: DateTime<Utc>, offset: FixedOffset) -> Option<bool> {
        self.hours.as_ref()?.is_open_at(at, offset)
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    venues: Vec<Venue>,
    offset: FixedOffset,
}

impl Catalog {
    pub fn new(venues: Vec<Venue>, offset: FixedOffset) -> Result<Self> {
        for (idx, venue) in venues.iter().enumerate() {
            if venue.place_ref.trim().is_empty() {
                bail!("venue #{idx} has an empty place reference");
            }
            if venues[..idx].iter().any(|v| v.place_ref == venue.place_ref) {
                bail!("duplicate venue place reference {}", venue.place_ref);
            }
            if let Some(hours) = &venue.hours {
                hours.validate()?;
            }
        }
        Ok(Self { venues, offset })
    }

    pub fn from_offset_minutes(venues: Vec<Venue>, minutes: i32) -> Result<Self> {
        let Some(offset) = FixedOffset::east_opt(minutes * 60) else {
            bail!("utc offset of {minutes} minutes is out of range");
        };
        Self::new(venues, offset)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn active(&self) -> impl Iterator<Item = &Venue> {
        self.venues.iter().filter(|v| v.active)
    }

    pub fn get(&self, place_ref: &str) -> Option<&Venue> {
        self.venues.iter().find(|v| v.place_ref == place_ref)
    }

    /// Keeps only `ids` active, appending bare venues for ids the catalog
    /// does not know yet. An empty list leaves the catalog untouched.
    pub fn restrict_to(mut self, ids: &[String]) -> Self {
        if ids.is_empty() {
            return self;
        }
        for venue in &mut self.venues {
            venue.active = venue.active && ids.contains(&venue.place_ref);
        }
        for id in ids {
            if self.get(id).is_none() {
                self.venues.push(Venue::bare(id.clone()));
            }
        }
        self
    }
}

/// The deployment the service started with: the National Library of Israel.
pub fn default_venues() -> Vec<Venue> {
    let full_day = Some(DayHours { opens: 9, closes: 20 });
    let hours = WeeklyHours::new()
        .with_day(Weekday::Mon, full_day)
        .with_day(Weekday::Tue, full_day)
        .with_day(Weekday::Wed, full_day)
        .with_day(Weekday::Thu, full_day)
        .with_day(Weekday::Fri, Some(DayHours { opens: 9, closes: 13 }))
        .with_day(Weekday::Sat, None)
        .with_day(Weekday::Sun, full_day);

    vec![Venue {
        place_ref: "ChIJy8LxJaZGHRURzNVZXycuQnw".into(),
        name: "National Library of Israel".into(),
        name_localized: Some("הספרייה הלאומית".into()),
        address: Some("Edmond J. Safra Campus, Givat Ram, Jerusalem".into()),
        hours: Some(hours),
        active: true,
    }]
}
