//! Position persistence operations.

use anyhow::Result;
use chrono::{DateTime, Utc};
use hazard_core::{Position, PresenceRecord};
use sqlx::SqlitePool;

use crate::ports::ChangeKind;

/// Store `position` unless an equal or newer sample is already stored.
///
/// Returns what happened to the row, or `None` when the write lost.
pub async fn upsert_position(
    pool: &SqlitePool,
    position: &Position,
    seen_at: DateTime<Utc>,
) -> Result<Option<ChangeKind>> {
    let mut tx = pool.begin().await?;

    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT captured_at_us FROM positions WHERE entity_id = ?1")
            .bind(&position.entity_id)
            .fetch_optional(&mut *tx)
            .await?;

    let captured_at_us = position.captured_at.timestamp_micros();
    let kind = match existing {
        None => ChangeKind::Insert,
        Some((stored,)) if captured_at_us > stored => ChangeKind::Update,
        Some(_) => {
            tx.rollback().await.ok();
            return Ok(None);
        }
    };

    sqlx::query(
        r#"
        INSERT INTO positions (entity_id, latitude, longitude, accuracy_m, captured_at, captured_at_us, last_seen_at, last_seen_us)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(entity_id) DO UPDATE SET
            latitude = excluded.latitude,
            longitude = excluded.longitude,
            accuracy_m = excluded.accuracy_m,
            captured_at = excluded.captured_at,
            captured_at_us = excluded.captured_at_us,
            last_seen_at = excluded.last_seen_at,
            last_seen_us = excluded.last_seen_us
        WHERE excluded.captured_at_us > positions.captured_at_us
        "#,
    )
    .bind(&position.entity_id)
    .bind(position.latitude)
    .bind(position.longitude)
    .bind(position.accuracy_m)
    .bind(position.captured_at.to_rfc3339())
    .bind(captured_at_us)
    .bind(seen_at.to_rfc3339())
    .bind(seen_at.timestamp_micros())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(kind))
}

/// Returns true if a row was removed.
pub async fn delete_position(pool: &SqlitePool, entity_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM positions WHERE entity_id = ?1")
        .bind(entity_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Delete the row only if it has not been seen since `cutoff`.
///
/// Returns true if a row was removed.
pub async fn delete_position_if_stale(
    pool: &SqlitePool,
    entity_id: &str,
    cutoff: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query("DELETE FROM positions WHERE entity_id = ?1 AND last_seen_us < ?2")
        .bind(entity_id)
        .bind(cutoff.timestamp_micros())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_position(pool: &SqlitePool, entity_id: &str) -> Result<Option<PresenceRecord>> {
    let row = sqlx::query_as::<_, PositionRow>(
        "SELECT entity_id, latitude, longitude, accuracy_m, captured_at, last_seen_at FROM positions WHERE entity_id = ?1",
    )
    .bind(entity_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(into_record))
}

/// Load every stored position. Rows that fail to decode are skipped.
pub async fn list_positions(pool: &SqlitePool) -> Result<Vec<PresenceRecord>> {
    let rows = sqlx::query_as::<_, PositionRow>(
        "SELECT entity_id, latitude, longitude, accuracy_m, captured_at, last_seen_at FROM positions ORDER BY entity_id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(into_record).collect())
}

// Internal row type for SQLx
#[derive(sqlx::FromRow)]
struct PositionRow {
    entity_id: String,
    latitude: f64,
    longitude: f64,
    accuracy_m: Option<f64>,
    captured_at: String,
    last_seen_at: String,
}

impl TryFrom<PositionRow> for PresenceRecord {
    type Error = anyhow::Error;

    fn try_from(row: PositionRow) -> Result<Self> {
        let captured_at = parse_timestamp(&row.captured_at)?;
        let last_seen_at = parse_timestamp(&row.last_seen_at)?;
        let position = Position {
            entity_id: row.entity_id,
            latitude: row.latitude,
            longitude: row.longitude,
            captured_at,
            accuracy_m: row.accuracy_m,
        };
        position.validate()?;
        Ok(PresenceRecord::from_position(position, last_seen_at))
    }
}

fn into_record(row: PositionRow) -> Option<PresenceRecord> {
    let entity_id = row.entity_id.clone();
    match PresenceRecord::try_from(row) {
        Ok(record) => Some(record),
        Err(err) => {
            tracing::warn!("Skipping unreadable position row {}: {}", entity_id, err);
            None
        }
    }
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}
