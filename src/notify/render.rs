use std::fmt::Write as _;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::Venue;
use crate::models::{LoadLevel, Popularity};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    He,
}

/// What the status message says about one venue this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VenueState {
    /// A reading was taken and persisted.
    Observed {
        popularity: Option<Popularity>,
        is_open: Option<bool>,
    },
    /// The fetch or the append failed.
    NoData { is_open: Option<bool> },
    /// Not sampled because the venue is outside its opening hours.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VenueStatus {
    pub place_ref: String,
    pub name: String,
    #[serde(skip)]
    pub name_localized: Option<String>,
    #[serde(flatten)]
    pub state: VenueState,
}

impl VenueStatus {
    pub fn new(venue: &Venue, state: VenueState) -> Self {
        Self {
            place_ref: venue.place_ref.clone(),
            name: venue.name.clone(),
            name_localized: venue.name_localized.clone(),
            state,
        }
    }
}

struct Phrases {
    title: &'static str,
    low: &'static str,
    medium: &'static str,
    high: &'static str,
    no_data: &'static str,
    open: &'static str,
    closed: &'static str,
    hours_unknown: &'static str,
    no_venues: &'static str,
    updated: &'static str,
}

const ENGLISH: Phrases = Phrases {
    title: "Crowd levels",
    low: "Low",
    medium: "Medium",
    high: "High",
    no_data: "no data",
    open: "open",
    closed: "closed",
    hours_unknown: "hours unknown",
    no_venues: "No venues are being monitored.",
    updated: "Last updated",
};

const HEBREW: Phrases = Phrases {
    title: "עדכון עומס",
    low: "נמוך",
    medium: "בינוני",
    high: "גבוה",
    no_data: "אין נתונים",
    open: "פתוח",
    closed: "סגור",
    hours_unknown: "שעות לא ידועות",
    no_venues: "אין מקומות במעקב.",
    updated: "עודכן לאחרונה",
};

impl Language {
    fn phrases(self) -> &'static Phrases {
        match self {
            Language::En => &ENGLISH,
            Language::He => &HEBREW,
        }
    }
}

/// Renders the consolidated status body (Telegram Markdown).
pub fn render_message(
    statuses: &[VenueStatus],
    language: Language,
    at: DateTime<Utc>,
    offset: FixedOffset,
) -> String {
    let phrases = language.phrases();
    let mut body = format!("📊 *{}*\n\n", phrases.title);

    if statuses.is_empty() {
        body.push_str(phrases.no_venues);
        body.push('\n');
    }

    for status in statuses {
        let name = match (language, &status.name_localized) {
            (Language::He, Some(localized)) => localized.as_str(),
            _ => status.name.as_str(),
        };
        let name = strip_markup(name);

        let _ = match &status.state {
            VenueState::Observed {
                popularity: Some(popularity),
                is_open,
            } => writeln!(
                body,
                "{} *{name}*: {} ({popularity}) · {}",
                level_emoji(Some(popularity.level())),
                level_label(phrases, popularity.level()),
                open_label(phrases, *is_open),
            ),
            VenueState::Observed {
                popularity: None,
                is_open,
            }
            | VenueState::NoData { is_open } => writeln!(
                body,
                "{} *{name}*: {} · {}",
                level_emoji(None),
                phrases.no_data,
                open_label(phrases, *is_open),
            ),
            VenueState::Closed => writeln!(body, "🔒 *{name}*: {}", phrases.closed),
        };
    }

    let local = at.with_timezone(&offset);
    let _ = write!(body, "\n_{}: {}_", phrases.updated, local.format("%H:%M"));
    body
}

fn level_emoji(level: Option<LoadLevel>) -> &'static str {
    match level {
        Some(LoadLevel::Low) => "🟢",
        Some(LoadLevel::Medium) => "🟡",
        Some(LoadLevel::High) => "🔴",
        None => "⚪️",
    }
}

fn level_label(phrases: &Phrases, level: LoadLevel) -> &'static str {
    match level {
        LoadLevel::Low => phrases.low,
        LoadLevel::Medium => phrases.medium,
        LoadLevel::High => phrases.high,
    }
}

fn open_label(phrases: &Phrases, is_open: Option<bool>) -> &'static str {
    match is_open {
        Some(true) => phrases.open,
        Some(false) => phrases.closed,
        None => phrases.hours_unknown,
    }
}

/// Drops the characters legacy Telegram Markdown treats as markup.
///
/// Names are rendered inside a bold entity, where that dialect has no
/// escapes.
pub fn strip_markup(text: &str) -> String {
    text.chars()
        .filter(|ch| !matches!(ch, '_' | '*' | '`' | '['))
        .collect()
}
