use std::collections::HashMap;

use anyhow::{bail, Result};
use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Opening window for one weekday, in whole local hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub opens: u32,
    pub closes: u32,
}

impl DayHours {
    pub fn contains_hour(&self, hour: u32) -> bool {
        self.opens <= hour && hour < self.closes
    }
}

/// Weekly schedule keyed by weekday (`"Mon"`, `"Tue"`, ...).
///
/// A `null` value marks the venue closed all day. A weekday absent from the
/// map has no defined hours, which makes the open state unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeeklyHours(HashMap<Weekday, Option<DayHours>>);

impl WeeklyHours {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_day(mut self, day: Weekday, hours: Option<DayHours>) -> Self {
        self.0.insert(day, hours);
        self
    }

    pub fn day(&self, day: Weekday) -> Option<Option<DayHours>> {
        self.0.get(&day).copied()
    }

    pub fn is_open_at(&self, at: DateTime<Utc>, offset: FixedOffset) -> Option<bool> {
        let local = at.with_timezone(&offset);
        match self.day(local.weekday())? {
            Some(hours) => Some(hours.contains_hour(local.hour())),
            None => Some(false),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (day, hours) in &self.0 {
            if let Some(hours) = hours {
                if hours.closes > 24 || hours.opens >= hours.closes {
                    bail!(
                        "invalid hours for {day}: opens {} closes {}",
                        hours.opens,
                        hours.closes
                    );
                }
            }
        }
        Ok(())
    }
}
