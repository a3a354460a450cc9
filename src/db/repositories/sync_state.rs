use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::db::{
    connection::Database,
    helpers::{format_timestamp, parse_optional_datetime, to_u64},
    models::SyncState,
};

impl Database {
    pub async fn load_sync_state(&self) -> Result<SyncState> {
        self.execute(|conn| {
            let (watermark, last_run_at, imported_total) = conn
                .query_row(
                    "SELECT watermark, last_run_at, imported_total FROM sync_state WHERE id = 1",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, Option<String>>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .context("failed to read sync state")?;

            Ok(SyncState {
                watermark: parse_optional_datetime(watermark, "watermark")?,
                last_run_at: parse_optional_datetime(last_run_at, "last_run_at")?,
                imported_total: to_u64(imported_total, "imported_total")?,
            })
        })
        .await
    }

    /// Records a finished sync run. A `None` watermark keeps the stored one.
    pub async fn record_sync_run(
        &self,
        watermark: Option<DateTime<Utc>>,
        run_at: DateTime<Utc>,
        imported: u64,
    ) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sync_state
                 SET watermark = COALESCE(?1, watermark),
                     last_run_at = ?2,
                     imported_total = imported_total + ?3
                 WHERE id = 1",
                params![
                    watermark.map(format_timestamp),
                    format_timestamp(run_at),
                    i64::try_from(imported).unwrap_or(i64::MAX),
                ],
            )
            .context("failed to update sync state")?;
            Ok(())
        })
        .await
    }
}
