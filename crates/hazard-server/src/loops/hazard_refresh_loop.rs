//! Hazard zone refresh loop.
//!
//! Re-clusters reports for the current viewport once it has been still for
//! the debounce window, and periodically in the background so zones follow
//! newly filed reports.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

use crate::backoff::Backoff;
use crate::state::AppState;

const REFRESH_BACKOFF_MAX_SECS: u64 = 60;

pub async fn run_hazard_refresh_loop(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    let debounce = state.config().viewport_debounce;
    let mut viewport = state.watch_viewport();
    let mut ticker = interval(state.config().hazard_refresh_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut backoff = Backoff::new(
        Duration::from_secs(1),
        Duration::from_secs(REFRESH_BACKOFF_MAX_SECS),
    );
    let mut settle_at: Option<Instant> = None;
    state.mark_loop_heartbeat("hazard-refresh");

    loop {
        let deadline = settle_at;
        let settled = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Hazard refresh loop shutting down");
                break;
            }
            changed = viewport.changed() => {
                if changed.is_err() {
                    tracing::info!("Viewport channel closed");
                    break;
                }
                settle_at = Some(Instant::now() + debounce);
            }
            _ = settled => {
                settle_at = None;
                state.mark_loop_heartbeat("hazard-refresh");
                refresh(&state, &mut backoff).await;
            }
            _ = ticker.tick() => {
                state.mark_loop_heartbeat("hazard-refresh");
                if backoff.ready() {
                    refresh(&state, &mut backoff).await;
                }
            }
        }
    }
}

async fn refresh(state: &AppState, backoff: &mut Backoff) {
    let Some(bbox) = state.viewport() else {
        return;
    };

    match state.refresh_hazards(bbox).await {
        Ok(count) => {
            if backoff.is_tripped() {
                tracing::info!("Hazard refresh recovered");
            }
            backoff.reset();
            tracing::debug!("Hazard refresh produced {} zone(s)", count);
        }
        Err(err) => {
            // Keep serving the last published zones.
            let delay = backoff.fail();
            tracing::warn!("Hazard refresh failed: {} (backing off {:?})", err, delay);
        }
    }
}
