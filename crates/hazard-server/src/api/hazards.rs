//! Hazard zones, viewport updates and report intake.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use hazard_core::{BoundingBox, HazardZone, IncidentReport, Severity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::HazardError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ZonesResponse {
    pub generation: u64,
    pub computed_at: Option<DateTime<Utc>>,
    pub bbox: Option<BoundingBox>,
    pub zones: Vec<HazardZone>,
}

pub async fn list_zones(State(state): State<Arc<AppState>>) -> Json<ZonesResponse> {
    let snapshot = state.zone_snapshot();
    Json(ZonesResponse {
        generation: snapshot.generation,
        computed_at: snapshot.computed_at,
        bbox: snapshot.bbox,
        zones: snapshot.zones.as_ref().clone(),
    })
}

/// Zone outline for map rendering. Ring is `[lng, lat]` pairs, closed.
#[derive(Debug, Serialize)]
pub struct ZonePolygon {
    pub id: String,
    pub severity: Severity,
    pub radius_m: f64,
    pub ring: Vec<[f64; 2]>,
}

pub async fn zone_polygons(State(state): State<Arc<AppState>>) -> Json<Vec<ZonePolygon>> {
    let polygons = state
        .current_zones()
        .iter()
        .map(|zone| ZonePolygon {
            id: zone.id.clone(),
            severity: zone.severity,
            radius_m: zone.radius_m,
            ring: zone.polygon().iter().map(|p| [p.lng, p.lat]).collect(),
        })
        .collect();
    Json(polygons)
}

#[derive(Debug, Deserialize)]
pub struct ViewportRequest {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

/// Report the visible map area. Zones are recomputed once it settles.
pub async fn set_viewport(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ViewportRequest>,
) -> Result<StatusCode, HazardError> {
    let bbox = BoundingBox::new(req.west, req.south, req.east, req.north)?;
    state.set_viewport(bbox);
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub id: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub description: String,
    pub title: Option<String>,
    pub address: Option<String>,
    pub reported_at: Option<DateTime<Utc>>,
}

/// File a new incident report.
pub async fn submit_report(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReportRequest>,
) -> Result<(StatusCode, Json<IncidentReport>), HazardError> {
    let id = req.id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut report = IncidentReport::new(id, req.latitude, req.longitude, req.description)?;
    report.title = req.title;
    report.address = req.address;
    report.reported_at = Some(req.reported_at.unwrap_or_else(Utc::now));

    state.submit_report(report.clone()).await?;
    tracing::info!("Filed report {} at ({:.5}, {:.5})", report.id, report.latitude, report.longitude);
    Ok((StatusCode::CREATED, Json(report)))
}

/// Withdraw a report filed by mistake or no longer relevant.
pub async fn withdraw_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, HazardError> {
    if state.withdraw_report(&id).await? {
        tracing::info!("Withdrew report {}", id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(HazardError::NotFound(format!("report {}", id)))
    }
}
