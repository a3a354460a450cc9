mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{at, offset, FlakyStore};
use crowdwatch_lib::catalog::{Catalog, Venue};
use crowdwatch_lib::db::Database;
use crowdwatch_lib::failure::Failure;
use crowdwatch_lib::models::{Popularity, Reading};
use crowdwatch_lib::remote::{ObjectStore, PutMode};
use crowdwatch_lib::store::{ReadingKey, ReadingStore};
use crowdwatch_lib::sync::SyncAgent;

struct Fixture {
    remote: Arc<FlakyStore>,
    db: Database,
    agent: SyncAgent,
    _dir: tempfile::TempDir,
}

fn fixture(batch_size: usize) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("crowdwatch.db")).unwrap();
    let remote = Arc::new(FlakyStore::new());
    let catalog = Arc::new(Catalog::new(vec![Venue::bare("lib")], offset()).unwrap());
    let store = ReadingStore::new(remote.clone(), Some(db.clone()), catalog);
    let agent = SyncAgent::new(store).unwrap().with_batch_size(batch_size);
    Fixture {
        remote,
        db,
        agent,
        _dir: dir,
    }
}

/// Uploads one reading per minute starting at 10:00 and returns the keys.
async fn upload(remote: &FlakyStore, minutes: &[u32]) -> Vec<(String, DateTime<Utc>)> {
    let mut keys = Vec::new();
    for &minute in minutes {
        let ts = at(10, minute);
        let reading = Reading::observe("lib", Popularity::new(20 + minute as u8), ts, offset(), Some(true));
        let key = ReadingKey::new("lib", ts).to_key();
        remote
            .put(&key, serde_json::to_vec(&reading).unwrap(), PutMode::Create)
            .await
            .unwrap();
        keys.push((key, ts));
    }
    keys
}

#[tokio::test]
async fn interrupted_sync_keeps_watermark_and_resumes_without_duplicates() {
    let f = fixture(100);
    let uploaded = upload(&f.remote, &[0, 1, 2, 3, 4]).await;

    // The fourth download never completes; the run is abandoned mid-batch.
    f.remote.hang_after_gets(Some(3));
    let interrupted = tokio::time::timeout(Duration::from_millis(300), f.agent.sync()).await;
    assert!(interrupted.is_err());

    assert_eq!(f.db.count_readings().await.unwrap(), 3);
    assert_eq!(f.db.load_sync_state().await.unwrap().watermark, None);

    f.remote.heal();
    let report = f.agent.sync().await.unwrap();

    assert_eq!(report.listed, 5);
    assert_eq!(report.imported, 2);
    assert_eq!(report.already_present, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.watermark, Some(uploaded[4].1));
    assert_eq!(f.db.count_readings().await.unwrap(), 5);
}

#[tokio::test]
async fn second_sync_without_new_data_changes_nothing() {
    let f = fixture(100);
    upload(&f.remote, &[0, 1, 2]).await;

    let first = f.agent.sync().await.unwrap();
    assert_eq!(first.imported, 3);

    let second = f.agent.sync().await.unwrap();
    assert_eq!(second.imported, 0);
    assert_eq!(second.watermark, first.watermark);
    assert_eq!(f.db.count_readings().await.unwrap(), 3);

    let state = f.db.load_sync_state().await.unwrap();
    assert_eq!(state.imported_total, 3);
    assert!(state.last_run_at.is_some());
}

#[tokio::test]
async fn failed_object_freezes_watermark_until_imported() {
    let f = fixture(2);
    let uploaded = upload(&f.remote, &[0, 1, 2, 3]).await;
    f.remote.fail_get(&uploaded[1].0);

    let report = f.agent.sync().await.unwrap();

    assert_eq!(report.imported, 3);
    assert_eq!(report.failed, 1);
    assert!(matches!(
        &report.failures[0],
        Failure::SyncImportFailure { key, .. } if *key == uploaded[1].0
    ));
    assert_eq!(report.watermark, Some(uploaded[0].1));
    assert_eq!(
        f.db.load_sync_state().await.unwrap().watermark,
        Some(uploaded[0].1)
    );

    f.remote.heal();
    let retry = f.agent.sync().await.unwrap();

    assert_eq!(retry.imported, 1);
    assert_eq!(retry.failed, 0);
    assert_eq!(retry.watermark, Some(uploaded[3].1));
    assert_eq!(f.db.count_readings().await.unwrap(), 4);
}

#[tokio::test]
async fn unrecognized_keys_are_counted_and_skipped() {
    let f = fixture(100);
    upload(&f.remote, &[0]).await;
    f.remote
        .put("readings/2024-01-28/notes.txt", b"hello".to_vec(), PutMode::Create)
        .await
        .unwrap();

    let report = f.agent.sync().await.unwrap();

    assert_eq!(report.imported, 1);
    assert_eq!(report.unrecognized, 1);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn status_reports_local_remote_and_pending() {
    let f = fixture(100);
    upload(&f.remote, &[0, 1]).await;

    let before = f.agent.status().await.unwrap();
    assert_eq!(before.local_readings, 0);
    assert_eq!(before.remote_readings, 2);
    assert_eq!(before.pending, 2);

    f.agent.sync().await.unwrap();
    upload(&f.remote, &[5]).await;

    let after = f.agent.status().await.unwrap();
    assert_eq!(after.local_readings, 2);
    assert_eq!(after.remote_readings, 3);
    assert_eq!(after.pending, 1);
    assert_eq!(after.watermark, Some(at(10, 1)));
}

#[tokio::test]
async fn imported_rows_record_their_source_key() {
    let f = fixture(100);
    let uploaded = upload(&f.remote, &[7]).await;

    f.agent.sync().await.unwrap();

    let rows = f.db.latest_readings(10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].synced_from.as_deref(), Some(uploaded[0].0.as_str()));
    assert_eq!(rows[0].reading.popularity, Popularity::new(27));
}

async fn put_collector_object(remote: &FlakyStore, key: &str, timestamp: &str, popularity: u8) {
    let body = serde_json::json!({
        "timestamp": timestamp,
        "place_id": "ChIJy8LxJaZGHRURzNVZXycuQnw",
        "popularity": popularity,
        "day_of_week": 6,
        "hour": 14,
        "is_open": true,
    });
    remote
        .put(key, serde_json::to_vec_pretty(&body).unwrap(), PutMode::Create)
        .await
        .unwrap();
}

#[tokio::test]
async fn collector_objects_are_imported_once() {
    let f = fixture(100);
    upload(&f.remote, &[0]).await;
    f.agent.sync().await.unwrap();

    // Dated before the watermark; still picked up.
    let old_key = "readings/2023/12/31/14-30.json";
    put_collector_object(&f.remote, old_key, "2023-12-31T14:30:05.123456+02:00", 42).await;
    put_collector_object(&f.remote, "readings/2024/01/28/14-45.json", "2024-01-28T14:45:00+02:00", 55).await;

    let before = f.agent.status().await.unwrap();
    assert_eq!(before.remote_readings, 3);
    assert_eq!(before.pending, 2);

    let report = f.agent.sync().await.unwrap();

    assert_eq!(report.legacy, 2);
    assert_eq!(report.imported, 2);
    assert_eq!(report.unrecognized, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(report.watermark, Some(at(10, 0)));
    assert_eq!(f.db.count_readings().await.unwrap(), 3);

    let rows = f.db.latest_readings(10).await.unwrap();
    let old = rows
        .iter()
        .find(|row| row.synced_from.as_deref() == Some(old_key))
        .expect("collector object imported");
    assert_eq!(old.reading.venue_ref, "ChIJy8LxJaZGHRURzNVZXycuQnw");
    assert_eq!(old.reading.popularity, Popularity::new(42));

    let again = f.agent.sync().await.unwrap();
    assert_eq!(again.legacy, 0);
    assert_eq!(again.imported, 0);
    assert_eq!(f.agent.status().await.unwrap().pending, 0);
}

#[tokio::test]
async fn broken_collector_object_does_not_hold_back_the_watermark() {
    let f = fixture(100);
    let uploaded = upload(&f.remote, &[0, 1]).await;
    f.remote
        .put("readings/2024/01/28/09-00.json", b"{not json".to_vec(), PutMode::Create)
        .await
        .unwrap();

    let report = f.agent.sync().await.unwrap();

    assert_eq!(report.imported, 2);
    assert_eq!(report.failed, 1);
    assert!(matches!(
        &report.failures[0],
        Failure::SyncImportFailure { key, .. } if key == "readings/2024/01/28/09-00.json"
    ));
    assert_eq!(report.watermark, Some(uploaded[1].1));
}
