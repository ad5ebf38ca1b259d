//! HTTP API for the hazard server.

pub mod hazards;
pub mod presence;
pub mod risk;
pub mod ws;

use axum::{
    extract::State,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::cache::CacheStats;
use crate::state::AppState;

/// Create the API router.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/v1/zones", get(hazards::list_zones))
        .route("/v1/zones/polygons", get(hazards::zone_polygons))
        .route("/v1/viewport", put(hazards::set_viewport))
        .route("/v1/reports", post(hazards::submit_report))
        .route("/v1/reports/:id", delete(hazards::withdraw_report))
        .route("/v1/risk", get(risk::get_risk))
        .route("/v1/risk/dismiss", post(risk::dismiss_risk))
        .route("/v1/presence", get(presence::list_presence))
        .route("/v1/positions", post(presence::post_position))
        .route("/v1/positions/:entity_id", delete(presence::delete_position))
        .route("/v1/feed", get(ws::feed_handler))
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub presence_count: usize,
    pub zone_count: usize,
    pub zone_generation: u64,
    pub viewers: usize,
    pub cache: CacheStats,
    pub loops: Vec<LoopHeartbeat>,
}

#[derive(Serialize)]
pub struct LoopHeartbeat {
    pub name: String,
    pub last_beat: DateTime<Utc>,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let zones = state.zone_snapshot();
    Json(HealthResponse {
        status: "ok",
        presence_count: state.presence().len(),
        zone_count: zones.zones.len(),
        zone_generation: zones.generation,
        viewers: state.alerts().len(),
        cache: state.cache().stats(),
        loops: state
            .loop_heartbeats()
            .into_iter()
            .map(|(name, last_beat)| LoopHeartbeat { name, last_beat })
            .collect(),
    })
}
