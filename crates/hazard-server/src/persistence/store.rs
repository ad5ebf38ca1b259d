//! SQLite-backed durable store and report source.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hazard_core::{BoundingBox, IncidentReport, Position, PresenceRecord};
use std::sync::Arc;

use super::{positions, reports, Database};
use crate::error::HazardError;
use crate::ports::{ChangeEvent, ChangeKind, DurableStore, ReportSource, PRESENCE_TABLE};
use crate::sync::feed::LocalChangeFeed;

const SERVICE: &str = "durable store";

/// Announces every committed presence write on the local change feed.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
    feed: Arc<LocalChangeFeed>,
}

impl SqliteStore {
    pub fn new(db: Database, feed: Arc<LocalChangeFeed>) -> Self {
        Self { db, feed }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn submit_report(&self, report: &IncidentReport) -> Result<(), HazardError> {
        report.validate()?;
        reports::insert_report(self.db.pool(), report)
            .await
            .map_err(|e| HazardError::upstream(SERVICE, e))
    }

    /// Returns true if the report existed.
    pub async fn withdraw_report(&self, id: &str) -> Result<bool, HazardError> {
        reports::delete_report(self.db.pool(), id)
            .await
            .map_err(|e| HazardError::upstream(SERVICE, e))
    }

    fn publish_delete(&self, entity_id: &str, removed: bool) {
        if removed {
            self.feed.publish(ChangeEvent {
                table: PRESENCE_TABLE.to_string(),
                kind: ChangeKind::Delete,
                entity_id: Some(entity_id.to_string()),
                record: None,
            });
        }
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn upsert_position(&self, position: &Position) -> Result<(), HazardError> {
        let seen_at = Utc::now();
        let kind = positions::upsert_position(self.db.pool(), position, seen_at)
            .await
            .map_err(|e| HazardError::upstream(SERVICE, e))?;

        if let Some(kind) = kind {
            self.feed.publish(ChangeEvent {
                table: PRESENCE_TABLE.to_string(),
                kind,
                entity_id: Some(position.entity_id.clone()),
                record: Some(PresenceRecord::from_position(position.clone(), seen_at)),
            });
        }
        Ok(())
    }

    async fn delete_position(&self, entity_id: &str) -> Result<bool, HazardError> {
        let removed = positions::delete_position(self.db.pool(), entity_id)
            .await
            .map_err(|e| HazardError::upstream(SERVICE, e))?;
        self.publish_delete(entity_id, removed);
        Ok(removed)
    }

    async fn delete_position_if_stale(
        &self,
        entity_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, HazardError> {
        let removed = positions::delete_position_if_stale(self.db.pool(), entity_id, cutoff)
            .await
            .map_err(|e| HazardError::upstream(SERVICE, e))?;
        self.publish_delete(entity_id, removed);
        Ok(removed)
    }

    async fn list_positions(&self) -> Result<Vec<PresenceRecord>, HazardError> {
        positions::list_positions(self.db.pool())
            .await
            .map_err(|e| HazardError::upstream(SERVICE, e))
    }
}

#[async_trait]
impl ReportSource for SqliteStore {
    async fn reports_near(&self, bbox: &BoundingBox) -> Result<Vec<IncidentReport>, HazardError> {
        reports::reports_in_bbox(self.db.pool(), bbox)
            .await
            .map_err(|e| HazardError::upstream("report store", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;
    use crate::ports::ChangeFeed;
    use futures::StreamExt;

    #[tokio::test]
    async fn writes_are_announced_once_committed() {
        let db = init_database(":memory:", 1).await.unwrap();
        let feed = Arc::new(LocalChangeFeed::new());
        let store = SqliteStore::new(db, feed.clone());
        let mut events = feed.subscribe(PRESENCE_TABLE, &ChangeKind::ALL).await.unwrap();

        let now = Utc::now();
        let position = Position::new("a", 1.0, 1.0, now).unwrap();
        store.upsert_position(&position).await.unwrap();
        // Same sample again loses and is not announced.
        store.upsert_position(&position).await.unwrap();
        store.delete_position("a").await.unwrap();

        let first = events.next().await.unwrap();
        assert_eq!(first.kind, ChangeKind::Insert);
        assert_eq!(first.record.unwrap().position, position);
        let second = events.next().await.unwrap();
        assert_eq!(second.kind, ChangeKind::Delete);
    }

    #[tokio::test]
    async fn invalid_reports_are_rejected() {
        let db = init_database(":memory:", 1).await.unwrap();
        let store = SqliteStore::new(db, Arc::new(LocalChangeFeed::new()));
        let mut report = IncidentReport::new("r1", 1.0, 1.0, "x").unwrap();
        report.latitude = 123.0;
        assert!(matches!(
            store.submit_report(&report).await,
            Err(HazardError::Validation(_))
        ));
    }
}
