use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::catalog::Venue;
use crate::db::{
    connection::Database,
    helpers::{conversion_error, format_timestamp, parse_datetime, to_u64, to_u8},
    models::{InsertOutcome, StoredReading},
};
use crate::models::{Popularity, Reading};

use super::locations::get_or_create_location;

fn row_to_reading(row: &Row) -> Result<Reading, rusqlite::Error> {
    let timestamp: String = row.get("timestamp")?;
    let popularity: Option<i64> = row.get("popularity")?;

    let popularity = popularity
        .map(|value| Popularity::try_from(value).map_err(|e| conversion_error(anyhow::anyhow!(e))))
        .transpose()?;

    Ok(Reading {
        venue_ref: row.get("place_ref")?,
        popularity,
        timestamp: parse_datetime(&timestamp, "timestamp").map_err(conversion_error)?,
        day_of_week: to_u8(row.get("day_of_week")?, "day_of_week").map_err(conversion_error)?,
        hour: to_u8(row.get("hour")?, "hour").map_err(conversion_error)?,
        is_open: row.get("is_open")?,
    })
}

fn row_to_stored_reading(row: &Row) -> Result<StoredReading, rusqlite::Error> {
    Ok(StoredReading {
        id: row.get("id")?,
        location_name: row.get("name")?,
        synced_from: row.get("synced_from")?,
        reading: row_to_reading(row)?,
    })
}

impl Database {
    /// Inserts one reading for `venue`, creating its location row if needed.
    ///
    /// Location lookup and insert run in one transaction. A row that already
    /// exists for the same (location, timestamp) is reported, not overwritten.
    pub async fn insert_reading(
        &self,
        venue: &Venue,
        reading: &Reading,
        synced_from: Option<&str>,
    ) -> Result<InsertOutcome> {
        let venue = venue.clone();
        let record = reading.clone();
        let synced_from = synced_from.map(str::to_owned);
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let location_id = get_or_create_location(&tx, &venue)?;

            let changed = tx
                .execute(
                    "INSERT INTO readings (location_id, popularity, timestamp, day_of_week, hour, is_open, synced_from)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT (location_id, timestamp) DO NOTHING",
                    params![
                        location_id,
                        record.popularity.map(Popularity::value),
                        format_timestamp(record.timestamp),
                        record.day_of_week,
                        record.hour,
                        record.is_open,
                        synced_from,
                    ],
                )
                .with_context(|| format!("failed to insert reading for {}", venue.place_ref))?;

            tx.commit()?;
            Ok(if changed == 0 {
                InsertOutcome::AlreadyPresent
            } else {
                InsertOutcome::Inserted
            })
        })
        .await
    }

    /// Readings for one venue with `from <= timestamp < until`, oldest first.
    pub async fn readings_in_range(
        &self,
        place_ref: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Reading>> {
        let place_ref = place_ref.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT l.place_ref, r.popularity, r.timestamp, r.day_of_week, r.hour, r.is_open
                 FROM readings r
                 JOIN locations l ON r.location_id = l.id
                 WHERE l.place_ref = ?1 AND r.timestamp >= ?2 AND r.timestamp < ?3
                 ORDER BY r.timestamp ASC",
            )?;
            let readings = stmt
                .query_map(
                    params![place_ref, format_timestamp(from), format_timestamp(until)],
                    row_to_reading,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(readings)
        })
        .await
    }

    pub async fn latest_readings(&self, limit: u32) -> Result<Vec<StoredReading>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, l.name, l.place_ref, r.popularity, r.timestamp, r.day_of_week, r.hour,
                        r.is_open, r.synced_from
                 FROM readings r
                 JOIN locations l ON r.location_id = l.id
                 ORDER BY r.timestamp DESC, r.id DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit], row_to_stored_reading)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn count_readings(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?;
            to_u64(count, "readings count")
        })
        .await
    }

    /// Whether some row was imported from the remote object `key`.
    pub async fn is_synced_from(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.execute(move |conn| {
            let found: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM readings WHERE synced_from = ?1)",
                params![key],
                |row| row.get(0),
            )?;
            Ok(found)
        })
        .await
    }
}
