//! Incident report persistence operations.

use anyhow::Result;
use chrono::Utc;
use hazard_core::{BoundingBox, IncidentReport};
use sqlx::SqlitePool;

use super::positions::parse_timestamp;

/// Insert or replace a report by id.
pub async fn insert_report(pool: &SqlitePool, report: &IncidentReport) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO reports (id, latitude, longitude, description, title, address, reported_at, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(id) DO UPDATE SET
            latitude = ?2, longitude = ?3, description = ?4,
            title = ?5, address = ?6, reported_at = ?7
        "#,
    )
    .bind(&report.id)
    .bind(report.latitude)
    .bind(report.longitude)
    .bind(&report.description)
    .bind(&report.title)
    .bind(&report.address)
    .bind(report.reported_at.map(|t| t.to_rfc3339()))
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Reports inside `bbox`, oldest first. Handles boxes crossing the antimeridian.
pub async fn reports_in_bbox(pool: &SqlitePool, bbox: &BoundingBox) -> Result<Vec<IncidentReport>> {
    let lng_clause = if bbox.west <= bbox.east {
        "longitude >= ?3 AND longitude <= ?4"
    } else {
        "(longitude >= ?3 OR longitude <= ?4)"
    };
    let sql = format!(
        "SELECT id, latitude, longitude, description, title, address, reported_at FROM reports \
         WHERE latitude >= ?1 AND latitude <= ?2 AND {} \
         ORDER BY COALESCE(reported_at, created_at), id",
        lng_clause
    );

    let rows = sqlx::query_as::<_, ReportRow>(&sql)
        .bind(bbox.south)
        .bind(bbox.north)
        .bind(bbox.west)
        .bind(bbox.east)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            IncidentReport::try_from(row)
                .map_err(|err| tracing::warn!("Skipping unreadable report row {}: {}", id, err))
                .ok()
        })
        .collect())
}

pub async fn delete_report(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM reports WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: String,
    latitude: f64,
    longitude: f64,
    description: String,
    title: Option<String>,
    address: Option<String>,
    reported_at: Option<String>,
}

impl TryFrom<ReportRow> for IncidentReport {
    type Error = anyhow::Error;

    fn try_from(row: ReportRow) -> Result<Self> {
        let reported_at = row.reported_at.as_deref().map(parse_timestamp).transpose()?;
        let report = IncidentReport {
            id: row.id,
            latitude: row.latitude,
            longitude: row.longitude,
            description: row.description,
            title: row.title,
            address: row.address,
            reported_at,
        };
        report.validate()?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;

    #[tokio::test]
    async fn bbox_query_filters_and_orders() {
        let db = init_database(":memory:", 1).await.unwrap();
        let pool = db.pool();

        for (id, lat, lng) in [("b", 10.0, 10.0), ("a", 10.001, 10.001), ("far", 50.0, 50.0)] {
            let report = IncidentReport::new(id, lat, lng, "pothole").unwrap();
            insert_report(pool, &report).await.unwrap();
        }

        let bbox = BoundingBox::new(9.0, 9.0, 11.0, 11.0).unwrap();
        let ids: Vec<String> = reports_in_bbox(pool, &bbox)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains(&"far".to_string()));
    }

    #[tokio::test]
    async fn bbox_across_antimeridian() {
        let db = init_database(":memory:", 1).await.unwrap();
        let pool = db.pool();
        for (id, lng) in [("east", 179.5), ("west", -179.5), ("middle", 0.0)] {
            let report = IncidentReport::new(id, 0.0, lng, "debris").unwrap();
            insert_report(pool, &report).await.unwrap();
        }

        let bbox = BoundingBox::new(179.0, -1.0, -179.0, 1.0).unwrap();
        let mut ids: Vec<String> = reports_in_bbox(pool, &bbox)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["east", "west"]);
    }

    #[tokio::test]
    async fn resubmitting_replaces_report() {
        let db = init_database(":memory:", 1).await.unwrap();
        let pool = db.pool();
        let report = IncidentReport::new("r1", 1.0, 1.0, "first").unwrap();
        insert_report(pool, &report).await.unwrap();
        let report = IncidentReport::new("r1", 1.0, 1.0, "second").unwrap();
        insert_report(pool, &report).await.unwrap();

        let bbox = BoundingBox::new(0.0, 0.0, 2.0, 2.0).unwrap();
        let found = reports_in_bbox(pool, &bbox).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].description, "second");
        assert!(delete_report(pool, "r1").await.unwrap());
    }
}
