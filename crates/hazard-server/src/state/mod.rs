//! Shared application state.

pub mod alerts;
pub mod presence;
pub mod zones;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hazard_core::{
    AlertStateMachine, BoundingBox, GeoPoint, HazardZone, IncidentClusterer, IncidentReport,
    Position,
};
use tokio::sync::watch;

use crate::cache::{keys, CacheLayer};
use crate::config::Config;
use crate::error::HazardError;
use crate::persistence::SqliteStore;
use crate::ports::{DurableStore, ReportSource};
use crate::sync::{LocalChangeFeed, PositionPipeline};

use alerts::{ViewerAlertView, ViewerAlerts};
use presence::{PresenceStore, PresenceView, UpsertOutcome, ViewerQuery};
use zones::{ZoneBoard, ZoneSnapshot};

pub struct AppState {
    config: Config,
    presence: Arc<PresenceStore>,
    zones: ZoneBoard,
    alerts: ViewerAlerts,
    cache: Arc<CacheLayer>,
    pipeline: PositionPipeline,
    store: SqliteStore,
    reports: Arc<dyn ReportSource>,
    feed: Arc<LocalChangeFeed>,
    clusterer: IncidentClusterer,
    viewport: watch::Sender<Option<BoundingBox>>,
    loop_heartbeats: DashMap<&'static str, DateTime<Utc>>,
}

impl AppState {
    /// `reports` overrides the SQLite report table as the hazard source.
    pub fn new(
        config: Config,
        cache: Arc<CacheLayer>,
        store: SqliteStore,
        feed: Arc<LocalChangeFeed>,
        reports: Option<Arc<dyn ReportSource>>,
    ) -> Self {
        let presence = Arc::new(PresenceStore::new(config.presence_rules()));
        let durable: Arc<dyn DurableStore> = Arc::new(store.clone());
        let pipeline = PositionPipeline::new(presence.clone(), Some(durable), cache.clone());
        let reports = match reports {
            Some(reports) => reports,
            None => Arc::new(store.clone()) as Arc<dyn ReportSource>,
        };
        let (viewport, _) = watch::channel(None);

        Self {
            alerts: ViewerAlerts::new(AlertStateMachine::new(config.alert_rules())),
            clusterer: IncidentClusterer::new(config.cluster_rules()),
            zones: ZoneBoard::new(),
            presence,
            cache,
            pipeline,
            store,
            reports,
            feed,
            viewport,
            loop_heartbeats: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn presence(&self) -> &Arc<PresenceStore> {
        &self.presence
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    pub fn pipeline(&self) -> &PositionPipeline {
        &self.pipeline
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn feed(&self) -> &Arc<LocalChangeFeed> {
        &self.feed
    }

    pub fn alerts(&self) -> &ViewerAlerts {
        &self.alerts
    }

    // === Map collaborator queries ===

    pub fn current_zones(&self) -> Arc<Vec<HazardZone>> {
        self.zones.zones()
    }

    pub fn zone_snapshot(&self) -> ZoneSnapshot {
        self.zones.snapshot()
    }

    /// Evaluate `viewer_id` standing at `point` against the current zones.
    pub fn current_risk(&self, viewer_id: &str, point: GeoPoint) -> ViewerAlertView {
        let zones = self.current_zones();
        self.alerts.observe(viewer_id, point, &zones)
    }

    pub fn dismiss_risk(&self, viewer_id: &str) -> Option<ViewerAlertView> {
        self.alerts.dismiss(viewer_id)
    }

    /// Presence visible to a viewer, served from cache when fresh.
    pub async fn visible_presence(&self, query: &ViewerQuery) -> Vec<PresenceView> {
        let key = keys::presence_key(query.viewer_id.as_deref(), query.zoom, query.bbox.as_ref());
        if let Some(cached) = self.cache.get_json::<Vec<PresenceView>>(&key).await {
            return cached;
        }

        let views = self.presence.snapshot_visible_to(query, Utc::now());
        self.cache
            .set_json(&key, &views, self.config.presence_cache_ttl)
            .await;
        views
    }

    // === Writes ===

    pub async fn ingest_position(&self, position: Position) -> Result<UpsertOutcome, HazardError> {
        let entity_id = position.entity_id.clone();
        let point = position.point();
        let outcome = self.pipeline.publish(position).await?;

        // Entities that also watch their own risk get re-evaluated as they move.
        if outcome.applied() && self.alerts.current(&entity_id).is_some() {
            self.current_risk(&entity_id, point);
        }
        Ok(outcome)
    }

    pub async fn withdraw(&self, entity_id: &str) -> Result<bool, HazardError> {
        self.alerts.forget(entity_id);
        self.pipeline.withdraw(entity_id).await
    }

    pub async fn submit_report(&self, report: IncidentReport) -> Result<(), HazardError> {
        self.store.submit_report(&report).await?;
        self.cache.delete_by_pattern(keys::REPORTS_PATTERN).await;
        // Wake the refresh loop without moving the viewport.
        self.viewport.send_modify(|_| {});
        Ok(())
    }

    /// Retract a report. Zones drop it on the next refresh.
    pub async fn withdraw_report(&self, id: &str) -> Result<bool, HazardError> {
        let removed = self.store.withdraw_report(id).await?;
        if removed {
            self.cache.delete_by_pattern(keys::REPORTS_PATTERN).await;
            self.viewport.send_modify(|_| {});
        }
        Ok(removed)
    }

    // === Hazard zones ===

    pub fn set_viewport(&self, bbox: BoundingBox) {
        self.viewport.send_replace(Some(bbox));
    }

    pub fn viewport(&self) -> Option<BoundingBox> {
        *self.viewport.borrow()
    }

    pub fn watch_viewport(&self) -> watch::Receiver<Option<BoundingBox>> {
        self.viewport.subscribe()
    }

    /// Valid reports inside `bbox`, served from cache when fresh.
    pub async fn fetch_reports(&self, bbox: &BoundingBox) -> Result<Vec<IncidentReport>, HazardError> {
        let key = keys::reports_key(bbox);
        if let Some(cached) = self.cache.get_json::<Vec<IncidentReport>>(&key).await {
            return Ok(cached);
        }

        let fetched = self.reports.reports_near(bbox).await?;
        let total = fetched.len();
        let reports: Vec<IncidentReport> = fetched
            .into_iter()
            .filter(|report| match report.validate() {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!("Dropping invalid report {}: {}", report.id, err);
                    false
                }
            })
            .collect();
        if reports.len() < total {
            tracing::debug!("Kept {} of {} reports", reports.len(), total);
        }

        self.cache
            .set_json(&key, &reports, self.config.report_cache_ttl)
            .await;
        Ok(reports)
    }

    /// Re-cluster reports for `bbox` and publish the result. Returns the zone count.
    pub async fn refresh_hazards(&self, bbox: BoundingBox) -> Result<usize, HazardError> {
        let reports = self.fetch_reports(&bbox).await?;
        let zones = self.clusterer.cluster(&reports);
        let count = zones.len();
        self.publish_zones(zones, Some(bbox));
        Ok(count)
    }

    pub fn publish_zones(&self, zones: Vec<HazardZone>, bbox: Option<BoundingBox>) {
        let count = zones.len();
        let generation = self.zones.publish(zones, bbox);
        let zones = self.zones.zones();
        let changed = self.alerts.reevaluate_all(&zones);
        tracing::debug!(
            "Published {} hazard zone(s) (generation {}, {} viewer alert(s) changed)",
            count,
            generation,
            changed
        );
    }

    // === Loop health ===

    pub fn mark_loop_heartbeat(&self, name: &'static str) {
        self.loop_heartbeats.insert(name, Utc::now());
    }

    pub fn loop_heartbeats(&self) -> Vec<(String, DateTime<Utc>)> {
        let mut beats: Vec<(String, DateTime<Utc>)> = self
            .loop_heartbeats
            .iter()
            .map(|entry| (entry.key().to_string(), *entry.value()))
            .collect();
        beats.sort_by(|a, b| a.0.cmp(&b.0));
        beats
    }
}
