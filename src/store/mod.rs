//! Reading persistence: the remote append-only log plus the optional local
//! relational copy.
//!
//! `ReadingStore` is the only writer of readings. The fetch cycle appends to
//! both copies; the sync agent fills the local copy from the remote one.

mod keys;

pub use keys::{date_prefix, is_legacy_key, ReadingKey, READINGS_PREFIX};

use std::ops::Range;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::catalog::{Catalog, Venue};
use crate::db::{Database, InsertOutcome};
use crate::models::Reading;
use crate::remote::{ObjectStore, ObjectStoreError, PutMode};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "crowdwatch::store";

use crate::{log_debug, log_warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("remote append of {key} failed: {source}")]
    Remote {
        key: String,
        #[source]
        source: ObjectStoreError,
    },

    #[error("failed to encode reading: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReceipt {
    pub key: String,
    /// Outcome of the local insert; `None` outside local mode or when the
    /// insert failed (the sync agent repairs that from the remote copy).
    pub local: Option<InsertOutcome>,
}

#[derive(Clone)]
pub struct ReadingStore {
    remote: Arc<dyn ObjectStore>,
    local: Option<Database>,
    catalog: Arc<Catalog>,
}

impl ReadingStore {
    pub fn new(remote: Arc<dyn ObjectStore>, local: Option<Database>, catalog: Arc<Catalog>) -> Self {
        Self {
            remote,
            local,
            catalog,
        }
    }

    pub fn remote(&self) -> &Arc<dyn ObjectStore> {
        &self.remote
    }

    pub fn local(&self) -> Option<&Database> {
        self.local.as_ref()
    }

    /// Writes `reading` as a new remote object, then (in local mode) as a row.
    ///
    /// The remote object is created, never replaced: a second append for the
    /// same venue and second fails with `AlreadyExists`.
    pub async fn append(&self, reading: &Reading) -> Result<AppendReceipt, StoreError> {
        let key = ReadingKey::new(reading.venue_ref.clone(), reading.timestamp).to_key();
        let body = serde_json::to_vec_pretty(reading)?;

        self.remote
            .put(&key, body, PutMode::Create)
            .await
            .map_err(|source| StoreError::Remote {
                key: key.clone(),
                source,
            })?;
        log_debug!("Appended {key}");

        let local = match &self.local {
            Some(_) => match self.record_local(reading, None).await {
                Ok(outcome) => Some(outcome),
                Err(err) => {
                    log_warn!("Local insert for {key} failed, left for sync: {err:#}");
                    None
                }
            },
            None => None,
        };

        Ok(AppendReceipt { key, local })
    }

    /// Inserts into the local copy only. Duplicates are `AlreadyPresent`.
    pub async fn record_local(
        &self,
        reading: &Reading,
        source_key: Option<&str>,
    ) -> Result<InsertOutcome> {
        let db = self
            .local
            .as_ref()
            .ok_or_else(|| anyhow!("reading store has no local database"))?;
        let venue = self
            .catalog
            .get(&reading.venue_ref)
            .cloned()
            .unwrap_or_else(|| Venue::bare(reading.venue_ref.clone()));
        db.insert_reading(&venue, reading, source_key).await
    }

    /// Downloads and decodes one remote reading object.
    pub async fn load_remote(&self, key: &str) -> Result<Reading> {
        let bytes = self
            .remote
            .get(key)
            .await
            .with_context(|| format!("failed to download {key}"))?
            .ok_or_else(|| anyhow!("object {key} disappeared before download"))?;
        serde_json::from_slice(&bytes).with_context(|| format!("failed to decode {key}"))
    }

    /// Readings of one venue within `range`, oldest first.
    ///
    /// Served by the local database in local mode, otherwise by scanning the
    /// remote key space.
    pub async fn query(&self, venue_ref: &str, range: Range<DateTime<Utc>>) -> Result<Vec<Reading>> {
        if let Some(db) = &self.local {
            return db.readings_in_range(venue_ref, range.start, range.end).await;
        }

        let start = date_prefix(range.start);
        let keys = self
            .remote
            .list(READINGS_PREFIX, Some(&start))
            .await
            .context("failed to list remote readings")?;

        let mut matched: Vec<(ReadingKey, String)> = keys
            .into_iter()
            .filter_map(|key| ReadingKey::parse(&key).map(|parsed| (parsed, key)))
            .filter(|(parsed, _)| parsed.venue_ref == venue_ref && range.contains(&parsed.timestamp))
            .collect();
        matched.sort();

        let mut readings = Vec::with_capacity(matched.len());
        for (_, key) in matched {
            readings.push(self.load_remote(&key).await?);
        }
        Ok(readings)
    }
}
