//! Local relational copy of the reading log (SQLite).

pub mod connection;
pub mod helpers;
mod migrations;
pub mod models;
pub mod repositories;

pub use connection::Database;
pub use models::{InsertOutcome, Location, StoredReading, SyncState};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Venue;
    use crate::models::{Popularity, Reading};
    use chrono::{Duration, FixedOffset, TimeZone, Utc};

    fn reading(venue: &str, minute: u32, popularity: Option<u8>) -> Reading {
        let at = Utc.with_ymd_and_hms(2024, 1, 28, 12, minute, 0).unwrap();
        Reading::observe(
            venue,
            popularity.and_then(Popularity::new),
            at,
            FixedOffset::east_opt(7200).unwrap(),
            Some(true),
        )
    }

    #[tokio::test]
    async fn duplicate_timestamp_is_already_present() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("readings.db")).unwrap();
        let venue = Venue::bare("v1");

        let first = db.insert_reading(&venue, &reading("v1", 0, Some(40)), None).await.unwrap();
        let second = db
            .insert_reading(&venue, &reading("v1", 0, Some(90)), Some("readings/x.json"))
            .await
            .unwrap();

        assert_eq!(first, InsertOutcome::Inserted);
        assert_eq!(second, InsertOutcome::AlreadyPresent);
        assert_eq!(db.count_readings().await.unwrap(), 1);
        assert_eq!(db.list_locations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn range_query_is_half_open_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("readings.db")).unwrap();
        let venue = Venue::bare("v1");
        for minute in [30, 0, 15] {
            db.insert_reading(&venue, &reading("v1", minute, Some(10)), None).await.unwrap();
        }
        db.insert_reading(&Venue::bare("v2"), &reading("v2", 5, None), None).await.unwrap();

        let from = Utc.with_ymd_and_hms(2024, 1, 28, 12, 0, 0).unwrap();
        let rows = db.readings_in_range("v1", from, from + Duration::minutes(30)).await.unwrap();

        let minutes: Vec<_> = rows.iter().map(|r| r.timestamp.format("%M").to_string()).collect();
        assert_eq!(minutes, vec!["00", "15"]);
    }

    #[tokio::test]
    async fn sync_state_keeps_watermark_when_none_given() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("readings.db")).unwrap();
        let mark = Utc.with_ymd_and_hms(2024, 1, 28, 12, 0, 0).unwrap();

        db.record_sync_run(Some(mark), mark, 3).await.unwrap();
        db.record_sync_run(None, mark + Duration::hours(1), 0).await.unwrap();

        let state = db.load_sync_state().await.unwrap();
        assert_eq!(state.watermark, Some(mark));
        assert_eq!(state.last_run_at, Some(mark + Duration::hours(1)));
        assert_eq!(state.imported_total, 3);
    }
}
