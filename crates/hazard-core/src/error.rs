//! Validation errors raised before data enters the engine.

use thiserror::Error;

/// Malformed input rejected at the boundary of the core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),
    #[error("{field} must not be empty")]
    EmptyId { field: &'static str },
    #[error("bounding box is inverted (south {south} > north {north})")]
    InvertedBounds { south: f64, north: f64 },
    #[error("{field} must be a finite, non-negative number (got {value})")]
    InvalidMeasure { field: &'static str, value: f64 },
    #[error("{field} is incomplete")]
    Incomplete { field: &'static str },
}

/// Check a coordinate pair against the WGS84 ranges.
///
/// NaN fails both range checks, so it is rejected here as well.
pub fn validate_coordinates(lat: f64, lng: f64) -> Result<(), ValidationError> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(ValidationError::Latitude(lat));
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(ValidationError::Longitude(lng));
    }
    Ok(())
}
