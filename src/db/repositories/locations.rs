use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::catalog::{Venue, WeeklyHours};
use crate::db::{
    connection::Database,
    helpers::{conversion_error, format_timestamp, parse_datetime},
    models::Location,
};

fn row_to_location(row: &Row) -> Result<Location, rusqlite::Error> {
    let hours_json: Option<String> = row.get("operating_hours")?;
    let created_at: String = row.get("created_at")?;

    let operating_hours = hours_json
        .map(|raw| serde_json::from_str::<WeeklyHours>(&raw))
        .transpose()
        .map_err(|e| conversion_error(e.into()))?;

    Ok(Location {
        id: row.get("id")?,
        name: row.get("name")?,
        name_localized: row.get("name_localized")?,
        place_ref: row.get("place_ref")?,
        address: row.get("address")?,
        operating_hours,
        active: row.get("active")?,
        created_at: parse_datetime(&created_at, "created_at").map_err(conversion_error)?,
    })
}

/// Returns the row id for `venue`, inserting a location row on first sight.
///
/// Existing rows are left as they are; the catalog is the source of truth for
/// metadata, the table only anchors foreign keys.
pub(crate) fn get_or_create_location(conn: &Connection, venue: &Venue) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM locations WHERE place_ref = ?1",
            params![venue.place_ref],
            |row| row.get(0),
        )
        .optional()
        .context("failed to look up location")?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let hours_json = venue
        .hours
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("failed to serialize operating hours")?;

    conn.execute(
        "INSERT INTO locations (name, name_localized, place_ref, address, operating_hours, active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            venue.name,
            venue.name_localized,
            venue.place_ref,
            venue.address,
            hours_json,
            venue.active,
            format_timestamp(Utc::now()),
        ],
    )
    .with_context(|| format!("failed to insert location {}", venue.place_ref))?;

    let id = conn.last_insert_rowid();
    log::info!("Created location {} ({}) with id {id}", venue.name, venue.place_ref);
    Ok(id)
}

impl Database {
    pub async fn list_locations(&self) -> Result<Vec<Location>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, name_localized, place_ref, address, operating_hours, active, created_at
                 FROM locations
                 ORDER BY id ASC",
            )?;
            let locations = stmt
                .query_map([], row_to_location)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(locations)
        })
        .await
    }
}
