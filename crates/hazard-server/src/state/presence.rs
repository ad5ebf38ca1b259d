//! Live presence of every known entity.
//!
//! One record per entity, last-write-wins on `captured_at`. Writers for the
//! same entity serialize on the map's entry lock; there is no global lock.

use std::collections::HashSet;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hazard_core::{BoundingBox, Position, PresenceRecord, PresenceRules};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// An equal or newer sample was already stored
    IgnoredStale,
}

impl UpsertOutcome {
    pub fn applied(self) -> bool {
        !matches!(self, Self::IgnoredStale)
    }
}

/// Local change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceEvent {
    Upserted { record: PresenceRecord },
    Removed { entity_id: String },
}

/// Who is asking, and what part of the map they can see.
#[derive(Debug, Clone, Default)]
pub struct ViewerQuery {
    pub viewer_id: Option<String>,
    pub zoom: f64,
    pub bbox: Option<BoundingBox>,
}

/// A record as shown to a viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceView {
    #[serde(flatten)]
    pub record: PresenceRecord,
    /// Older than the freshness threshold but not yet expired
    pub stale: bool,
}

pub struct PresenceStore {
    records: DashMap<String, PresenceRecord>,
    rules: PresenceRules,
    events: broadcast::Sender<PresenceEvent>,
}

impl PresenceStore {
    pub fn new(rules: PresenceRules) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            records: DashMap::new(),
            rules,
            events,
        }
    }

    pub fn rules(&self) -> &PresenceRules {
        &self.rules
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.events.subscribe()
    }

    pub fn upsert(&self, position: Position) -> UpsertOutcome {
        self.upsert_at(position, Utc::now())
    }

    pub fn upsert_at(&self, position: Position, seen_at: DateTime<Utc>) -> UpsertOutcome {
        let (outcome, record) = match self.records.entry(position.entity_id.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get_mut().supersede(position, seen_at) {
                    (UpsertOutcome::Updated, Some(entry.get().clone()))
                } else {
                    (UpsertOutcome::IgnoredStale, None)
                }
            }
            Entry::Vacant(entry) => {
                let record = PresenceRecord::from_position(position, seen_at);
                entry.insert(record.clone());
                (UpsertOutcome::Inserted, Some(record))
            }
        };

        if let Some(record) = record {
            let _ = self.events.send(PresenceEvent::Upserted { record });
        }
        outcome
    }

    /// Apply a record fetched from durable storage, keeping its `last_seen_at`.
    pub fn upsert_record(&self, record: PresenceRecord) -> UpsertOutcome {
        let seen_at = record.last_seen_at;
        self.upsert_at(record.position, seen_at)
    }

    pub fn remove(&self, entity_id: &str) -> Option<PresenceRecord> {
        let removed = self.records.remove(entity_id).map(|(_, record)| record);
        if removed.is_some() {
            let _ = self.events.send(PresenceEvent::Removed {
                entity_id: entity_id.to_string(),
            });
        }
        removed
    }

    /// Remove `entity_id` only if it was last seen before `cutoff`,
    /// checked under the entry lock.
    pub fn remove_if_seen_before(&self, entity_id: &str, cutoff: DateTime<Utc>) -> bool {
        let removed = self
            .records
            .remove_if(entity_id, |_, record| record.last_seen_at < cutoff)
            .is_some();
        if removed {
            let _ = self.events.send(PresenceEvent::Removed {
                entity_id: entity_id.to_string(),
            });
        }
        removed
    }

    pub fn get(&self, entity_id: &str) -> Option<PresenceRecord> {
        self.records.get(entity_id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn entity_ids(&self) -> HashSet<String> {
        self.records.iter().map(|r| r.key().clone()).collect()
    }

    /// Remove records not seen within the expiry window. Returns the removed ids.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let cutoff = now - self.expire_after();
        let expired: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.value().last_seen_at < cutoff)
            .map(|r| r.key().clone())
            .collect();

        // A fresh upsert may land between the scan and the removal.
        expired
            .into_iter()
            .filter(|entity_id| self.remove_if_seen_before(entity_id, cutoff))
            .collect()
    }

    /// Records visible to `query`, excluding the viewer's own, sorted by entity id.
    pub fn snapshot_visible_to(&self, query: &ViewerQuery, now: DateTime<Utc>) -> Vec<PresenceView> {
        if query.zoom < self.rules.min_zoom {
            return Vec::new();
        }

        let stale_cutoff = now - ChronoDuration::seconds(self.rules.stale_after_secs as i64);
        let expire_cutoff = now - self.expire_after();

        let mut views: Vec<PresenceView> = self
            .records
            .iter()
            .filter(|r| query.viewer_id.as_deref() != Some(r.key().as_str()))
            .filter(|r| r.value().last_seen_at >= expire_cutoff)
            .filter(|r| {
                query
                    .bbox
                    .map_or(true, |bbox| bbox.contains(&r.value().position.point()))
            })
            .map(|r| PresenceView {
                stale: r.value().last_seen_at < stale_cutoff,
                record: r.value().clone(),
            })
            .collect();
        views.sort_by(|a, b| a.record.entity_id.cmp(&b.record.entity_id));
        views
    }

    fn expire_after(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.rules.expire_after_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn pos(id: &str, lat: f64, lng: f64, at: i64) -> Position {
        Position::new(id, lat, lng, t(at)).unwrap()
    }

    fn store() -> PresenceStore {
        PresenceStore::new(PresenceRules::default())
    }

    fn query(viewer: Option<&str>, zoom: f64) -> ViewerQuery {
        ViewerQuery {
            viewer_id: viewer.map(str::to_string),
            zoom,
            bbox: None,
        }
    }

    #[test]
    fn newest_capture_wins() {
        let store = store();
        assert_eq!(store.upsert_at(pos("a", 1.0, 1.0, 10), t(10)), UpsertOutcome::Inserted);
        assert_eq!(store.upsert_at(pos("a", 2.0, 2.0, 20), t(20)), UpsertOutcome::Updated);
        assert_eq!(
            store.upsert_at(pos("a", 3.0, 3.0, 15), t(21)),
            UpsertOutcome::IgnoredStale
        );
        assert_eq!(
            store.upsert_at(pos("a", 4.0, 4.0, 20), t(22)),
            UpsertOutcome::IgnoredStale
        );

        let record = store.get("a").unwrap();
        assert_eq!(record.position.latitude, 2.0);
        assert_eq!(record.last_seen_at, t(20));
    }

    #[test]
    fn snapshot_hides_viewer_and_respects_min_zoom() {
        let store = store();
        store.upsert_at(pos("me", 1.0, 1.0, 0), t(0));
        store.upsert_at(pos("b", 1.0, 1.001, 0), t(0));
        store.upsert_at(pos("c", 1.0, 1.002, 0), t(0));

        assert!(store.snapshot_visible_to(&query(Some("me"), 11.9), t(1)).is_empty());

        let ids: Vec<String> = store
            .snapshot_visible_to(&query(Some("me"), 12.0), t(1))
            .into_iter()
            .map(|v| v.record.entity_id)
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn snapshot_filters_by_bbox_and_flags_stale() {
        let store = store();
        store.upsert_at(pos("near", 10.0, 10.0, 0), t(0));
        store.upsert_at(pos("fresh", 10.01, 10.01, 50), t(50));
        store.upsert_at(pos("far", 40.0, 40.0, 50), t(50));

        let q = ViewerQuery {
            viewer_id: None,
            zoom: 15.0,
            bbox: Some(BoundingBox::new(9.9, 9.9, 10.1, 10.1).unwrap()),
        };
        let views = store.snapshot_visible_to(&q, t(60));
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].record.entity_id, "fresh");
        assert!(!views[0].stale);
        assert_eq!(views[1].record.entity_id, "near");
        assert!(views[1].stale);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let store = store();
        let mut events = store.subscribe();
        store.upsert_at(pos("old", 0.0, 0.0, 0), t(0));
        store.upsert_at(pos("new", 0.0, 0.0, 100), t(100));
        while events.try_recv().is_ok() {}

        let removed = store.sweep_expired(t(150));
        assert_eq!(removed, vec!["old".to_string()]);
        assert!(store.get("old").is_none());
        assert!(store.get("new").is_some());
        assert_eq!(
            events.try_recv().unwrap(),
            PresenceEvent::Removed {
                entity_id: "old".into()
            }
        );
    }

    #[test]
    fn ignored_writes_emit_no_event() {
        let store = store();
        let mut events = store.subscribe();
        store.upsert_at(pos("a", 0.0, 0.0, 5), t(5));
        store.upsert_at(pos("a", 0.0, 0.0, 4), t(6));
        assert!(matches!(events.try_recv(), Ok(PresenceEvent::Upserted { .. })));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn concurrent_writers_keep_the_newest_sample() {
        let store = std::sync::Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let at = i * 8 + worker;
                        store.upsert_at(pos("shared", 0.0, 0.0, at), t(at));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get("shared").unwrap().position.captured_at, t(199 * 8 + 7));
    }
}
