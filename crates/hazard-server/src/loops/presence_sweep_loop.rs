//! Presence expiry loop.
//!
//! Removes entities that stopped reporting, locally and in durable storage.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};

use crate::cache::keys;
use crate::state::AppState;

pub async fn run_presence_sweep_loop(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(state.config().sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    state.mark_loop_heartbeat("presence-sweep");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Presence sweep loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                state.mark_loop_heartbeat("presence-sweep");
                sweep_once(&state).await;
            }
        }
    }
}

/// Returns the number of entities removed.
pub async fn sweep_once(state: &AppState) -> usize {
    let now = Utc::now();
    let cutoff = now - ChronoDuration::seconds(state.presence().rules().expire_after_secs as i64);

    let idle = state.alerts().sweep_idle(cutoff);
    if idle > 0 {
        tracing::debug!("Dropped alert state for {} idle viewer(s)", idle);
    }

    let expired = state.presence().sweep_expired(now);
    if expired.is_empty() {
        return 0;
    }

    tracing::info!("Expired {} silent entit(ies)", expired.len());
    if let Some(durable) = state.pipeline().durable() {
        for entity_id in &expired {
            // Rows another instance refreshed since the cutoff stay.
            if let Err(err) = durable.delete_position_if_stale(entity_id, cutoff).await {
                tracing::warn!("Durable delete for expired {} failed: {}", entity_id, err);
            }
        }
    }
    state.cache().delete_by_pattern(keys::PRESENCE_PATTERN).await;
    expired.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLayer;
    use crate::config::Config;
    use crate::persistence::{init_database, positions, SqliteStore};
    use crate::sync::LocalChangeFeed;
    use hazard_core::Position;
    use std::time::Duration;

    async fn state() -> AppState {
        let db = init_database(":memory:", 1).await.unwrap();
        let feed = Arc::new(LocalChangeFeed::new());
        let store = SqliteStore::new(db, feed.clone());
        let cache = Arc::new(CacheLayer::local_only(Duration::from_secs(5)));
        AppState::new(Config::default(), cache, store, feed, None)
    }

    #[tokio::test]
    async fn sweep_keeps_rows_a_peer_refreshed() {
        let state = state().await;
        let long_ago = Utc::now() - ChronoDuration::seconds(600);
        let local = Position::new("walker", 1.0, 1.0, long_ago).unwrap();
        state.presence().upsert_at(local, long_ago);

        // Another instance saw the walker just now.
        let fresh = Position::new("walker", 1.1, 1.1, Utc::now()).unwrap();
        let pool = state.store().database().pool();
        positions::upsert_position(pool, &fresh, Utc::now()).await.unwrap();

        assert_eq!(sweep_once(&state).await, 1);
        assert!(state.presence().get("walker").is_none());
        assert!(positions::get_position(pool, "walker").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_deletes_rows_nobody_refreshed() {
        let state = state().await;
        let long_ago = Utc::now() - ChronoDuration::seconds(600);
        let position = Position::new("gone", 1.0, 1.0, long_ago).unwrap();
        state.presence().upsert_at(position.clone(), long_ago);
        let pool = state.store().database().pool();
        positions::upsert_position(pool, &position, long_ago).await.unwrap();

        assert_eq!(sweep_once(&state).await, 1);
        assert!(positions::get_position(pool, "gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_drops_alert_state_of_idle_viewers() {
        let mut config = Config::default();
        config.expire_after_secs = 0;
        config.stale_after_secs = 0;
        let db = init_database(":memory:", 1).await.unwrap();
        let feed = Arc::new(LocalChangeFeed::new());
        let store = SqliteStore::new(db, feed.clone());
        let cache = Arc::new(CacheLayer::local_only(Duration::from_secs(5)));
        let state = AppState::new(config, cache, store, feed, None);

        state.current_risk("viewer", hazard_core::GeoPoint::new(1.0, 1.0));
        assert_eq!(state.alerts().len(), 1);
        tokio::time::sleep(Duration::from_millis(5)).await;

        sweep_once(&state).await;
        assert!(state.alerts().is_empty());
    }
}
