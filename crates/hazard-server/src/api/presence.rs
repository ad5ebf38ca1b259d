//! Presence endpoints: position ingest, stop sharing and visible presence.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use hazard_core::{BoundingBox, Position, ValidationError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::HazardError;
use crate::state::presence::{PresenceView, UpsertOutcome, ViewerQuery};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PresenceQuery {
    pub viewer_id: Option<String>,
    pub zoom: f64,
    pub west: Option<f64>,
    pub south: Option<f64>,
    pub east: Option<f64>,
    pub north: Option<f64>,
}

impl PresenceQuery {
    fn bbox(&self) -> Result<Option<BoundingBox>, ValidationError> {
        match (self.west, self.south, self.east, self.north) {
            (None, None, None, None) => Ok(None),
            (Some(west), Some(south), Some(east), Some(north)) => {
                BoundingBox::new(west, south, east, north).map(Some)
            }
            _ => Err(ValidationError::Incomplete { field: "bbox" }),
        }
    }
}

/// List entities visible to the viewer.
pub async fn list_presence(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PresenceQuery>,
) -> Result<Json<Vec<PresenceView>>, HazardError> {
    if !query.zoom.is_finite() {
        return Err(ValidationError::InvalidMeasure {
            field: "zoom",
            value: query.zoom,
        }
        .into());
    }
    let viewer = ViewerQuery {
        bbox: query.bbox()?,
        viewer_id: query.viewer_id,
        zoom: query.zoom,
    };
    Ok(Json(state.visible_presence(&viewer).await))
}

#[derive(Debug, Deserialize)]
pub struct PositionRequest {
    pub entity_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Defaults to the time of receipt
    pub captured_at: Option<DateTime<Utc>>,
    pub accuracy_m: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct PositionResponse {
    pub entity_id: String,
    pub outcome: UpsertOutcome,
}

/// Ingest one position sample.
pub async fn post_position(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PositionRequest>,
) -> Result<(StatusCode, Json<PositionResponse>), HazardError> {
    let captured_at = req.captured_at.unwrap_or_else(Utc::now);
    let mut position = Position::new(req.entity_id, req.latitude, req.longitude, captured_at)?;
    if let Some(accuracy) = req.accuracy_m {
        position = position.with_accuracy(accuracy)?;
    }

    let entity_id = position.entity_id.clone();
    let outcome = state.ingest_position(position).await?;
    let status = if outcome.applied() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(PositionResponse { entity_id, outcome })))
}

/// Stop sharing: remove the entity from every tier.
pub async fn delete_position(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<StatusCode, HazardError> {
    if state.withdraw(&entity_id).await? {
        tracing::info!("Entity {} stopped sharing", entity_id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(HazardError::NotFound(format!("entity {}", entity_id)))
    }
}
