//! Replays the remote reading log into the local database.
//!
//! Progress is a timestamp watermark kept in `sync_state`. Listing resumes at
//! the watermark's date and every key at or after it is replayed; the
//! `(location, timestamp)` uniqueness constraint absorbs the overlap.
//!
//! Objects left by the earlier collector are named by local minute only. They
//! are imported by body, stay outside the watermark and are skipped once a
//! row records them as its source.

mod lock;

pub use lock::SyncLock;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{Database, InsertOutcome};
use crate::failure::Failure;
use crate::store::{date_prefix, is_legacy_key, ReadingKey, ReadingStore, READINGS_PREFIX};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "crowdwatch::sync";

use crate::{log_debug, log_info, log_warn};

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Candidate objects at or after the starting watermark.
    pub listed: usize,
    pub imported: usize,
    pub already_present: usize,
    pub failed: usize,
    pub unrecognized: usize,
    /// Earlier-collector objects not yet imported.
    pub legacy: usize,
    pub watermark: Option<DateTime<Utc>>,
    pub failures: Vec<Failure>,
}

/// Keys a run will look at.
struct Candidates {
    keyed: Vec<(ReadingKey, String)>,
    legacy: Vec<String>,
    unrecognized: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub local_readings: u64,
    pub remote_readings: u64,
    /// Remote readings newer than the watermark, plus earlier-collector
    /// objects not imported yet.
    pub pending: u64,
    pub watermark: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
}

pub struct SyncAgent {
    store: ReadingStore,
    db: Database,
    batch_size: usize,
    lock_path: PathBuf,
}

impl SyncAgent {
    /// Fails when `store` has no local database to sync into.
    pub fn new(store: ReadingStore) -> Result<Self> {
        let db = store
            .local()
            .cloned()
            .ok_or_else(|| anyhow!("sync needs a local database (set `database` in the config)"))?;
        let lock_path = SyncLock::path_for(db.path());
        Ok(Self {
            store,
            db,
            batch_size: DEFAULT_BATCH_SIZE,
            lock_path,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn sync(&self) -> Result<SyncReport> {
        let _lock = SyncLock::acquire(&self.lock_path)?;

        let state = self.db.load_sync_state().await?;
        let Candidates {
            keyed,
            legacy,
            unrecognized,
        } = self.candidates(state.watermark).await?;

        let mut report = SyncReport {
            listed: keyed.len(),
            unrecognized,
            legacy: legacy.len(),
            watermark: state.watermark,
            ..SyncReport::default()
        };
        log_info!(
            "Sync starting from {:?}: {} candidate(s), {} legacy",
            state.watermark,
            keyed.len(),
            legacy.len()
        );

        // Once an object fails, the watermark stays below it until a later
        // run imports it.
        let mut blocked = false;

        for batch in keyed.chunks(self.batch_size) {
            let mut frontier = None;
            let imported_before = report.imported;

            for (parsed, key) in batch {
                if !self.import_into(key, &mut report).await {
                    blocked = true;
                    continue;
                }
                if !blocked {
                    frontier = Some(parsed.timestamp);
                }
            }

            let imported = report.imported - imported_before;
            self.db
                .record_sync_run(frontier, Utc::now(), imported as u64)
                .await
                .context("failed to persist sync progress")?;
            if frontier.is_some() {
                report.watermark = frontier;
            }
            log_debug!("Batch done: {imported} imported, watermark {:?}", report.watermark);
        }

        let imported_before = report.imported;
        for key in &legacy {
            self.import_into(key, &mut report).await;
        }
        let legacy_imported = report.imported - imported_before;

        if keyed.is_empty() || legacy_imported > 0 {
            self.db
                .record_sync_run(None, Utc::now(), legacy_imported as u64)
                .await
                .context("failed to persist sync progress")?;
        }

        log_info!(
            "Sync finished: {} imported, {} already present, {} failed, {} unrecognized",
            report.imported,
            report.already_present,
            report.failed,
            report.unrecognized
        );
        Ok(report)
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        let state = self.db.load_sync_state().await?;
        let local_readings = self.db.count_readings().await?;

        let keys = self.list(None).await?;
        let stamps: Vec<DateTime<Utc>> = keys
            .iter()
            .filter_map(|key| ReadingKey::parse(key))
            .map(|parsed| parsed.timestamp)
            .collect();
        let pending = match state.watermark {
            Some(watermark) => stamps.iter().filter(|ts| **ts > watermark).count(),
            None => stamps.len(),
        };
        let legacy: Vec<&String> = keys.iter().filter(|key| is_legacy_key(key)).collect();
        let mut legacy_pending = 0;
        for key in &legacy {
            if !self.db.is_synced_from(key).await? {
                legacy_pending += 1;
            }
        }

        Ok(SyncStatus {
            local_readings,
            remote_readings: (stamps.len() + legacy.len()) as u64,
            pending: (pending + legacy_pending) as u64,
            watermark: state.watermark,
            last_run_at: state.last_run_at,
        })
    }

    async fn list(&self, start_offset: Option<&str>) -> Result<Vec<String>> {
        self.store
            .remote()
            .list(READINGS_PREFIX, start_offset)
            .await
            .context("failed to list remote readings")
    }

    /// Reading keys at or after `watermark` (oldest first), earlier-collector
    /// objects not imported yet, and the count of keys that are neither.
    async fn candidates(&self, watermark: Option<DateTime<Utc>>) -> Result<Candidates> {
        let start = watermark.map(date_prefix);
        let keys = self.list(start.as_deref()).await?;

        let mut unrecognized = 0;
        let mut keyed = Vec::with_capacity(keys.len());
        for key in &keys {
            if is_legacy_key(key) {
                continue;
            }
            let Some(parsed) = ReadingKey::parse(key) else {
                log_warn!("Skipping unrecognized object {key}");
                unrecognized += 1;
                continue;
            };
            if watermark.map_or(true, |w| parsed.timestamp >= w) {
                keyed.push((parsed, key.clone()));
            }
        }
        keyed.sort();

        // Earlier-collector names do not sort by date with the current ones,
        // so they need the whole listing.
        let all = match start {
            Some(_) => self.list(None).await?,
            None => keys,
        };
        let mut legacy = Vec::new();
        for key in all.into_iter().filter(|key| is_legacy_key(key)) {
            if !self.db.is_synced_from(&key).await? {
                legacy.push(key);
            }
        }

        Ok(Candidates {
            keyed,
            legacy,
            unrecognized,
        })
    }

    /// Imports one object and tallies it. `false` when the import failed.
    async fn import_into(&self, key: &str, report: &mut SyncReport) -> bool {
        match self.import(key).await {
            Ok(InsertOutcome::Inserted) => {
                report.imported += 1;
                true
            }
            Ok(InsertOutcome::AlreadyPresent) => {
                report.already_present += 1;
                true
            }
            Err(err) => {
                log_warn!("Import of {key} failed: {err:#}");
                report.failed += 1;
                report.failures.push(Failure::SyncImportFailure {
                    key: key.to_string(),
                    reason: format!("{err:#}"),
                });
                false
            }
        }
    }

    async fn import(&self, key: &str) -> Result<InsertOutcome> {
        let reading = self.store.load_remote(key).await?;
        self.store.record_local(&reading, Some(key)).await
    }
}
