//! Per-viewer risk alerts.

use axum::{
    extract::{Query, State},
    Json,
};
use hazard_core::GeoPoint;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::HazardError;
use crate::state::alerts::ViewerAlertView;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RiskQuery {
    pub viewer_id: String,
    pub lat: f64,
    pub lng: f64,
}

/// Evaluate the viewer's location against the current hazard zones.
pub async fn get_risk(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RiskQuery>,
) -> Result<Json<ViewerAlertView>, HazardError> {
    if query.viewer_id.trim().is_empty() {
        return Err(hazard_core::ValidationError::EmptyId { field: "viewer_id" }.into());
    }
    let point = GeoPoint::checked(query.lat, query.lng)?;
    Ok(Json(state.current_risk(&query.viewer_id, point)))
}

#[derive(Debug, Deserialize)]
pub struct DismissRequest {
    pub viewer_id: String,
}

/// Silence the viewer's current alert until its level changes.
pub async fn dismiss_risk(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DismissRequest>,
) -> Result<Json<ViewerAlertView>, HazardError> {
    state
        .dismiss_risk(&req.viewer_id)
        .map(Json)
        .ok_or_else(|| HazardError::NotFound(format!("viewer {}", req.viewer_id)))
}
