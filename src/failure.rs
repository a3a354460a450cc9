use serde::Serialize;

/// A per-venue or per-object failure reported in cycle and sync summaries.
///
/// None of these abort the run that reports them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    VenueUnavailable { venue_ref: String, reason: String },
    StoreWriteFailure { venue_ref: String, reason: String },
    SyncImportFailure { key: String, reason: String },
    NotificationFailure { reason: String },
}
