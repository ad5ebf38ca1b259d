//! Presence synchronization.
//!
//! Pushes the local entity's samples out through the [`PositionPipeline`]
//! and folds remote change notifications back into the local
//! [`PresenceStore`](crate::state::presence::PresenceStore). Notifications
//! are hints: each one triggers a re-fetch of the durable store, which is
//! the source of truth.

pub mod feed;
pub mod pipeline;
pub mod ws_feed;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::StreamExt;
use hazard_core::PresenceRecord;
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use crate::backoff::Backoff;
use crate::cache::keys;
use crate::error::HazardError;
use crate::ports::{ChangeEvent, ChangeFeed, ChangeKind, PositionSource, PRESENCE_TABLE};

pub use feed::LocalChangeFeed;
pub use pipeline::PositionPipeline;
pub use ws_feed::WsChangeFeed;

const RESUBSCRIBE_BASE: Duration = Duration::from_secs(1);
const RESUBSCRIBE_MAX: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Running,
    /// The position source gave up; the feed side keeps running.
    Failed(String),
}

/// What a remote notification did to local presence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub applied: usize,
    pub removed: usize,
    /// The durable re-fetch failed and the event payload was used instead
    pub from_payload: bool,
}

struct Running {
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct SyncProtocol {
    local_entity_id: String,
    pipeline: PositionPipeline,
    feed: Arc<dyn ChangeFeed>,
    source: Option<Arc<dyn PositionSource>>,
    running: Mutex<Option<Running>>,
    status: watch::Sender<SyncStatus>,
}

impl SyncProtocol {
    pub fn new(
        local_entity_id: impl Into<String>,
        pipeline: PositionPipeline,
        feed: Arc<dyn ChangeFeed>,
        source: Option<Arc<dyn PositionSource>>,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            local_entity_id: local_entity_id.into(),
            pipeline,
            feed,
            source,
            running: Mutex::new(None),
            status,
        }
    }

    pub fn local_entity_id(&self) -> &str {
        &self.local_entity_id
    }

    pub fn pipeline(&self) -> &PositionPipeline {
        &self.pipeline
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Begin sharing the local position and consuming remote changes.
    /// Calling it again while running does nothing.
    pub async fn start(self: &Arc<Self>) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            tracing::debug!("Sync already running for {}", self.local_entity_id);
            return;
        }

        let (shutdown, _) = broadcast::channel(1);
        let mut tasks = Vec::with_capacity(2);
        tasks.push(tokio::spawn(
            self.clone().run_feed(shutdown.subscribe()),
        ));
        if let Some(source) = self.source.clone() {
            tasks.push(tokio::spawn(
                self.clone().run_position_source(source, shutdown.subscribe()),
            ));
        }

        self.status.send_replace(SyncStatus::Running);
        *running = Some(Running { shutdown, tasks });
        tracing::info!("Presence sync started for {}", self.local_entity_id);
    }

    /// Cancel both subscriptions and wait for them to finish.
    /// Calling it while stopped does nothing.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(Running { shutdown, tasks }) = running.take() else {
            return;
        };

        let _ = shutdown.send(());
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!("Sync task ended abnormally: {}", err);
            }
        }
        self.status.send_replace(SyncStatus::Idle);
        tracing::info!("Presence sync stopped for {}", self.local_entity_id);
    }

    /// Withdraw the local entity from every tier.
    pub async fn stop_sharing(&self) -> Result<bool, HazardError> {
        self.pipeline.withdraw(&self.local_entity_id).await
    }

    /// Fold a remote notification into local presence.
    pub async fn apply_remote(&self, event: ChangeEvent) -> ReconcileSummary {
        if event.entity_id.as_deref() == Some(self.local_entity_id.as_str()) {
            tracing::trace!("Ignoring echo of local entity {}", self.local_entity_id);
            return ReconcileSummary::default();
        }

        let refetch_started = Utc::now();
        let refetched = match self.pipeline.durable() {
            Some(durable) => durable.list_positions().await.map(Some),
            None => Ok(None),
        };

        let summary = match refetched {
            Ok(Some(records)) => self.reconcile(records, refetch_started),
            Ok(None) => self.apply_payload(event),
            Err(err) => {
                tracing::warn!("Presence re-fetch failed, applying notification payload: {}", err);
                self.apply_payload(event)
            }
        };

        if summary.applied > 0 || summary.removed > 0 {
            self.pipeline
                .cache()
                .delete_by_pattern(keys::PRESENCE_PATTERN)
                .await;
        }
        summary
    }

    /// Fold a durable snapshot into local presence.
    ///
    /// An entity missing from the snapshot is only dropped once it has gone
    /// stale locally: a fresh record may be a write that committed after the
    /// snapshot was taken, or one kept optimistically after a failed durable
    /// write. Delete events and the TTL sweep handle everything else.
    fn reconcile(
        &self,
        records: Vec<PresenceRecord>,
        refetch_started: DateTime<Utc>,
    ) -> ReconcileSummary {
        let presence = self.pipeline.presence();
        let rules = presence.rules();
        let cutoff = refetch_started - ChronoDuration::seconds(rules.expire_after_secs as i64);
        let absent_cutoff =
            refetch_started - ChronoDuration::seconds(rules.stale_after_secs as i64);

        let mut summary = ReconcileSummary::default();
        let mut seen = HashSet::with_capacity(records.len());
        for record in records {
            if record.entity_id == self.local_entity_id || record.last_seen_at < cutoff {
                continue;
            }
            seen.insert(record.entity_id.clone());
            if presence.upsert_record(record).applied() {
                summary.applied += 1;
            }
        }

        for entity_id in presence.entity_ids() {
            if entity_id != self.local_entity_id
                && !seen.contains(&entity_id)
                && presence.remove_if_seen_before(&entity_id, absent_cutoff)
            {
                summary.removed += 1;
            }
        }
        summary
    }

    fn apply_payload(&self, event: ChangeEvent) -> ReconcileSummary {
        let presence = self.pipeline.presence();
        let mut summary = ReconcileSummary {
            from_payload: true,
            ..ReconcileSummary::default()
        };

        match event.kind {
            ChangeKind::Delete => {
                if let Some(entity_id) = event.entity_id.as_deref() {
                    if presence.remove(entity_id).is_some() {
                        summary.removed = 1;
                    }
                }
            }
            ChangeKind::Insert | ChangeKind::Update => {
                let record = event
                    .record
                    .filter(|record| record.entity_id != self.local_entity_id)
                    .filter(|record| record.position.validate().is_ok());
                if let Some(record) = record {
                    if presence.upsert_record(record).applied() {
                        summary.applied = 1;
                    }
                }
            }
        }
        summary
    }

    async fn run_feed(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut backoff = Backoff::new(RESUBSCRIBE_BASE, RESUBSCRIBE_MAX);

        loop {
            let subscribed = tokio::select! {
                _ = shutdown.recv() => return,
                result = self.feed.subscribe(PRESENCE_TABLE, &ChangeKind::ALL) => result,
            };

            match subscribed {
                Ok(mut events) => {
                    backoff.reset();
                    // Catch up on anything missed before the subscription.
                    self.apply_remote(ChangeEvent::resync(PRESENCE_TABLE)).await;

                    loop {
                        tokio::select! {
                            _ = shutdown.recv() => return,
                            next = events.next() => match next {
                                Some(event) => {
                                    self.apply_remote(event).await;
                                }
                                None => {
                                    tracing::warn!("Presence change feed ended; resubscribing");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!("Presence change feed subscription failed: {}", err);
                }
            }

            let delay = backoff.fail();
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn run_position_source(
        self: Arc<Self>,
        source: Arc<dyn PositionSource>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut fixes = tokio::select! {
            _ = shutdown.recv() => return,
            result = source.subscribe() => match result {
                Ok(stream) => stream,
                Err(err) => {
                    self.fail(HazardError::from(err));
                    return;
                }
            },
        };

        loop {
            tokio::select! {
                _ = shutdown.recv() => return,
                next = fixes.next() => match next {
                    Some(Ok(fix)) => {
                        if let Err(err) = self.pipeline.publish_fix(&self.local_entity_id, fix).await {
                            match err {
                                HazardError::Validation(_) => {
                                    tracing::warn!("Dropping invalid position fix: {}", err);
                                }
                                other => tracing::warn!("Position publish degraded: {}", other),
                            }
                        }
                    }
                    Some(Err(err)) => {
                        self.fail(HazardError::from(err));
                        return;
                    }
                    None => {
                        tracing::info!("Position source for {} finished", self.local_entity_id);
                        return;
                    }
                }
            }
        }
    }

    fn fail(&self, err: HazardError) {
        tracing::error!("Position sharing stopped for {}: {}", self.local_entity_id, err);
        self.status.send_replace(SyncStatus::Failed(err.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLayer;
    use crate::error::PositionError;
    use crate::ports::DurableStore;
    use crate::sources::channel::ChannelPositionSource;
    use crate::state::presence::PresenceStore;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use hazard_core::{Position, PresenceRules};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct MemoryStore {
        rows: DashMap<String, PresenceRecord>,
        offline: AtomicBool,
    }

    impl MemoryStore {
        fn check(&self) -> Result<(), HazardError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(HazardError::upstream("durable store", "offline"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DurableStore for MemoryStore {
        async fn upsert_position(&self, position: &Position) -> Result<(), HazardError> {
            self.check()?;
            self.rows.insert(
                position.entity_id.clone(),
                PresenceRecord::from_position(position.clone(), Utc::now()),
            );
            Ok(())
        }
        async fn delete_position(&self, entity_id: &str) -> Result<bool, HazardError> {
            self.check()?;
            Ok(self.rows.remove(entity_id).is_some())
        }
        async fn delete_position_if_stale(
            &self,
            entity_id: &str,
            cutoff: DateTime<Utc>,
        ) -> Result<bool, HazardError> {
            self.check()?;
            Ok(self
                .rows
                .remove_if(entity_id, |_, row| row.last_seen_at < cutoff)
                .is_some())
        }
        async fn list_positions(&self) -> Result<Vec<PresenceRecord>, HazardError> {
            self.check()?;
            Ok(self.rows.iter().map(|r| r.value().clone()).collect())
        }
    }

    fn protocol(
        store: Arc<MemoryStore>,
        source: Option<Arc<dyn PositionSource>>,
    ) -> (Arc<SyncProtocol>, Arc<LocalChangeFeed>) {
        let presence = Arc::new(PresenceStore::new(PresenceRules::default()));
        let cache = Arc::new(CacheLayer::local_only(Duration::from_secs(5)));
        let pipeline = PositionPipeline::new(presence, Some(store), cache);
        let feed = Arc::new(LocalChangeFeed::new());
        let sync = Arc::new(SyncProtocol::new("me", pipeline, feed.clone(), source));
        (sync, feed)
    }

    fn record(id: &str, lat: f64) -> PresenceRecord {
        let position = Position::new(id, lat, 1.0, Utc::now()).unwrap();
        PresenceRecord::from_position(position, Utc::now())
    }

    fn upsert_event(record: PresenceRecord) -> ChangeEvent {
        ChangeEvent {
            table: PRESENCE_TABLE.into(),
            kind: ChangeKind::Update,
            entity_id: Some(record.entity_id.clone()),
            record: Some(record),
        }
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let (sync, feed) = protocol(Arc::new(MemoryStore::default()), None);

        sync.start().await;
        sync.start().await;
        assert!(sync.is_running().await);
        assert_eq!(sync.status(), SyncStatus::Running);
        tokio::time::timeout(Duration::from_secs(2), async {
            while feed.subscriber_count() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(feed.subscriber_count(), 1);

        sync.stop().await;
        sync.stop().await;
        assert!(!sync.is_running().await);
        assert_eq!(sync.status(), SyncStatus::Idle);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn echo_of_local_entity_is_ignored() {
        let store = Arc::new(MemoryStore::default());
        store.rows.insert("me".into(), record("me", 5.0));
        let (sync, _) = protocol(store, None);

        let summary = sync.apply_remote(upsert_event(record("me", 5.0))).await;
        assert_eq!(summary, ReconcileSummary::default());
        assert!(sync.pipeline.presence().get("me").is_none());
    }

    #[tokio::test]
    async fn remote_change_refetches_and_reconciles() {
        let store = Arc::new(MemoryStore::default());
        let (sync, _) = protocol(store.clone(), None);
        let presence = sync.pipeline.presence().clone();
        let long_ago = Utc::now() - chrono::Duration::seconds(60);
        presence.upsert_at(Position::new("gone", 0.0, 0.0, long_ago).unwrap(), long_ago);
        presence.upsert(Position::new("me", 0.0, 0.0, Utc::now()).unwrap());

        store.rows.insert("other".into(), record("other", 3.0));
        store.rows.insert("me".into(), record("me", 9.0));

        let summary = sync.apply_remote(ChangeEvent::resync(PRESENCE_TABLE)).await;
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.removed, 1);
        assert!(!summary.from_payload);
        assert!(presence.get("other").is_some());
        assert!(presence.get("gone").is_none());
        // Local entity is never overwritten by the durable copy.
        assert_eq!(presence.get("me").unwrap().position.latitude, 0.0);
    }

    #[tokio::test]
    async fn reconcile_keeps_fresh_write_missing_from_snapshot() {
        let store = Arc::new(MemoryStore::default());
        let (sync, _) = protocol(store.clone(), None);
        let presence = sync.pipeline.presence().clone();

        // Upserted locally; the durable commit has not landed yet.
        presence.upsert(Position::new("walker", 1.0, 1.0, Utc::now()).unwrap());
        store.rows.insert("other".into(), record("other", 3.0));

        let summary = sync.apply_remote(ChangeEvent::resync(PRESENCE_TABLE)).await;
        assert_eq!(summary.removed, 0);
        assert!(presence.get("walker").is_some());
        assert!(presence.get("other").is_some());
    }

    #[tokio::test]
    async fn optimistic_write_survives_failed_durable_upsert() {
        let store = Arc::new(MemoryStore::default());
        let (sync, _) = protocol(store.clone(), None);

        store.offline.store(true, Ordering::SeqCst);
        let result = sync
            .pipeline
            .publish(Position::new("peer", 2.0, 2.0, Utc::now()).unwrap())
            .await;
        assert!(result.is_err());
        store.offline.store(false, Ordering::SeqCst);

        let summary = sync.apply_remote(ChangeEvent::resync(PRESENCE_TABLE)).await;
        assert_eq!(summary.removed, 0);
        assert!(sync.pipeline.presence().get("peer").is_some());
    }

    #[tokio::test]
    async fn refetch_failure_falls_back_to_payload() {
        let store = Arc::new(MemoryStore::default());
        store.offline.store(true, Ordering::SeqCst);
        let (sync, _) = protocol(store, None);

        let summary = sync.apply_remote(upsert_event(record("other", 2.0))).await;
        assert!(summary.from_payload);
        assert_eq!(summary.applied, 1);
        assert!(sync.pipeline.presence().get("other").is_some());
    }

    #[tokio::test]
    async fn feed_events_reach_presence_while_running() {
        let store = Arc::new(MemoryStore::default());
        let (sync, feed) = protocol(store.clone(), None);
        let mut changes = sync.pipeline.presence().subscribe();
        sync.start().await;

        let remote = record("peer", 4.0);
        store.rows.insert("peer".into(), remote.clone());
        feed.publish(upsert_event(remote));

        let event = tokio::time::timeout(Duration::from_secs(2), changes.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            crate::state::presence::PresenceEvent::Upserted { ref record } if record.entity_id == "peer"
        ));
        sync.stop().await;
    }

    #[tokio::test]
    async fn position_errors_surface_as_failed() {
        let (source, tx) = ChannelPositionSource::new(8);
        let store = Arc::new(MemoryStore::default());
        let (sync, _) = protocol(store.clone(), Some(Arc::new(source)));
        let mut status = sync.watch_status();
        sync.start().await;

        tx.send(Ok(crate::ports::PositionFix {
            latitude: 1.0,
            longitude: 2.0,
            timestamp: Utc::now(),
            accuracy_m: None,
        }))
        .await
        .unwrap();
        tx.send(Err(PositionError::PermissionDenied)).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if matches!(*status.borrow_and_update(), SyncStatus::Failed(_)) {
                    break;
                }
                status.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        assert!(store.rows.contains_key("me"));
        assert!(sync.pipeline.presence().get("me").is_some());
        sync.stop().await;
    }

    #[tokio::test]
    async fn stop_sharing_withdraws_local_entity() {
        let store = Arc::new(MemoryStore::default());
        let (sync, _) = protocol(store.clone(), None);
        sync.pipeline
            .publish(Position::new("me", 1.0, 1.0, Utc::now()).unwrap())
            .await
            .unwrap();

        assert!(sync.stop_sharing().await.unwrap());
        assert!(sync.pipeline.presence().get("me").is_none());
        assert!(!store.rows.contains_key("me"));
    }
}
