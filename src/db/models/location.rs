//! Row model for the `locations` table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::WeeklyHours;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: i64,
    pub name: String,
    pub name_localized: Option<String>,
    pub place_ref: String,
    pub address: Option<String>,
    pub operating_hours: Option<WeeklyHours>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}
