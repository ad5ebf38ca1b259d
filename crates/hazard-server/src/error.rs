//! Error taxonomy for the service layer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hazard_core::ValidationError;
use serde_json::json;
use thiserror::Error;

/// Failures reported by a positioning source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("positioning unavailable: {0}")]
    Unavailable(String),
    #[error("positioning timed out")]
    Timeout,
}

/// Errors surfaced to callers of the presence and hazard services.
#[derive(Debug, Error)]
pub enum HazardError {
    /// Malformed input, rejected before touching any state
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A collaborator (storage, feed, report source) could not be reached.
    /// Callers keep serving last-known state.
    #[error("{service} unavailable: {message}")]
    UpstreamUnavailable {
        service: &'static str,
        message: String,
    },

    #[error("positioning source failed: {0}")]
    PositionSource(#[from] PositionError),

    #[error("not found: {0}")]
    NotFound(String),
}

impl HazardError {
    pub fn upstream(service: &'static str, err: impl std::fmt::Display) -> Self {
        Self::UpstreamUnavailable {
            service,
            message: err.to_string(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. })
    }
}

impl IntoResponse for HazardError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::PositionSource(PositionError::PermissionDenied) => StatusCode::FORBIDDEN,
            Self::PositionSource(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Remote cache tier failures. These never leave the cache layer.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Dragonfly/Redis error: {0}")]
    Remote(#[from] fred::error::Error),

    #[error("remote cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
