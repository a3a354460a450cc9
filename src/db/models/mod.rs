pub mod location;
pub mod stored_reading;

pub use location::Location;
pub use stored_reading::{InsertOutcome, StoredReading, SyncState};
