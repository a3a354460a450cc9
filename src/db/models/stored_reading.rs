//! Row models for `readings` and `sync_state`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Reading;

/// A reading as kept locally, with its row id and import provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredReading {
    pub id: i64,
    pub location_name: String,
    pub synced_from: Option<String>,
    #[serde(flatten)]
    pub reading: Reading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The (location, timestamp) pair was already stored.
    AlreadyPresent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub watermark: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub imported_total: u64,
}
