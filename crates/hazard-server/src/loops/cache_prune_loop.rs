//! Local cache tier pruning.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::interval;

use crate::state::AppState;

pub async fn run_cache_prune_loop(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(state.config().cache_prune_interval);
    let max_entries = state.config().cache_max_entries;
    state.mark_loop_heartbeat("cache-prune");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Cache prune loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                state.mark_loop_heartbeat("cache-prune");
                let removed = state.cache().prune(max_entries);
                if removed > 0 {
                    tracing::debug!("Pruned {} cache entr(ies)", removed);
                }
            }
        }
    }
}
