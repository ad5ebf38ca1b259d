//! Core data models for the presence & hazard engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{validate_coordinates, ValidationError};
use crate::geo::GeoPoint;

/// A single position report from a live entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub entity_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: DateTime<Utc>,
    /// Horizontal accuracy reported by the positioning source, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
}

impl Position {
    /// Create a validated position.
    pub fn new(
        entity_id: impl Into<String>,
        latitude: f64,
        longitude: f64,
        captured_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let position = Self {
            entity_id: entity_id.into(),
            latitude,
            longitude,
            captured_at,
            accuracy_m: None,
        };
        position.validate()?;
        Ok(position)
    }

    /// Attach a horizontal accuracy estimate.
    pub fn with_accuracy(mut self, accuracy_m: f64) -> Result<Self, ValidationError> {
        if !accuracy_m.is_finite() || accuracy_m < 0.0 {
            return Err(ValidationError::InvalidMeasure {
                field: "accuracy_m",
                value: accuracy_m,
            });
        }
        self.accuracy_m = Some(accuracy_m);
        Ok(self)
    }

    /// Re-check invariants, e.g. after deserializing from an untrusted source.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.entity_id.trim().is_empty() {
            return Err(ValidationError::EmptyId { field: "entity_id" });
        }
        validate_coordinates(self.latitude, self.longitude)
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// The latest known position of a live entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub entity_id: String,
    pub position: Position,
    pub last_seen_at: DateTime<Utc>,
}

impl PresenceRecord {
    pub fn from_position(position: Position, seen_at: DateTime<Utc>) -> Self {
        Self {
            entity_id: position.entity_id.clone(),
            position,
            last_seen_at: seen_at,
        }
    }

    /// Replace the stored position if `position` is strictly newer.
    ///
    /// Returns true when the record changed.
    pub fn supersede(&mut self, position: Position, seen_at: DateTime<Utc>) -> bool {
        if position.captured_at <= self.position.captured_at {
            return false;
        }
        self.position = position;
        self.last_seen_at = seen_at;
        true
    }
}

/// A raw hazard/incident report from the report source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentReport {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_at: Option<DateTime<Utc>>,
}

impl IncidentReport {
    /// Create a validated report with only required fields.
    pub fn new(
        id: impl Into<String>,
        latitude: f64,
        longitude: f64,
        description: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let report = Self {
            id: id.into(),
            latitude,
            longitude,
            description: description.into(),
            title: None,
            address: None,
            reported_at: None,
        };
        report.validate()?;
        Ok(report)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyId { field: "id" });
        }
        validate_coordinates(self.latitude, self.longitude)
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    /// Short label shown for this report inside a zone.
    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title,
            _ => &self.description,
        }
    }
}

/// Severity levels for hazard zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Severity as a pure function of cluster size.
    pub fn from_member_count(member_count: usize) -> Self {
        if member_count >= 5 {
            Self::High
        } else if member_count >= 3 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// A geofenced area built from one or more clustered incident reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardZone {
    pub id: String,
    pub center_lat: f64,
    pub center_lng: f64,
    pub radius_m: f64,
    pub severity: Severity,
    pub member_count: usize,
    pub titles: Vec<String>,
    /// Report ids in the order they joined the zone
    pub member_ids: Vec<String>,
}

impl HazardZone {
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(self.center_lat, self.center_lng)
    }

    /// Distance from `point` to the zone boundary; negative inside the zone.
    pub fn distance_to_edge(&self, point: &GeoPoint) -> f64 {
        crate::geo::distance_meters(point, &self.center()) - self.radius_m
    }

    /// Closed square ring for map collaborators that draw polygons.
    pub fn polygon(&self) -> [GeoPoint; 5] {
        crate::geo::square_polygon(&self.center(), self.radius_m)
    }
}

/// Alert tiers, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
}

/// Which label set a deployment exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertScale {
    /// safe / low / medium / high
    #[default]
    FourLevel,
    /// safe / warning / danger
    ThreeLevel,
}

impl AlertScale {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "four" | "four_level" | "4" => Some(Self::FourLevel),
            "three" | "three_level" | "3" => Some(Self::ThreeLevel),
            _ => None,
        }
    }

    /// Display label for `level` on this scale.
    pub fn label(self, level: RiskLevel) -> &'static str {
        match (self, level) {
            (_, RiskLevel::Safe) => "safe",
            (Self::FourLevel, RiskLevel::Low) => "low",
            (Self::FourLevel, RiskLevel::Medium) => "medium",
            (Self::FourLevel, RiskLevel::High) => "high",
            // Low never occurs on the three-level scale; fold it into warning.
            (Self::ThreeLevel, RiskLevel::Low | RiskLevel::Medium) => "warning",
            (Self::ThreeLevel, RiskLevel::High) => "danger",
        }
    }
}

/// Derived per-viewer risk; never stored durably.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nearest_zone_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_to_edge_m: Option<f64>,
}

impl RiskAssessment {
    pub fn safe(scale: AlertScale) -> Self {
        Self {
            level: RiskLevel::Safe,
            label: scale.label(RiskLevel::Safe).to_string(),
            nearest_zone_id: None,
            distance_to_edge_m: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn position_rejects_bad_coordinates() {
        let now = Utc::now();
        assert!(Position::new("a", 95.0, 0.0, now).is_err());
        assert!(Position::new("a", 0.0, 200.0, now).is_err());
        assert!(Position::new(" ", 0.0, 0.0, now).is_err());
        assert!(Position::new("a", 45.0, 7.0, now).is_ok());
    }

    #[test]
    fn accuracy_must_be_non_negative() {
        let pos = Position::new("a", 1.0, 1.0, Utc::now()).unwrap();
        assert!(pos.clone().with_accuracy(-1.0).is_err());
        assert_eq!(pos.with_accuracy(8.0).unwrap().accuracy_m, Some(8.0));
    }

    #[test]
    fn supersede_is_last_write_wins_by_capture_time() {
        let t10 = Utc::now();
        let t5 = t10 - Duration::seconds(5);
        let newer = Position::new("a", 10.0, 10.0, t10).unwrap();
        let older = Position::new("a", 5.0, 5.0, t5).unwrap();

        let mut record = PresenceRecord::from_position(newer.clone(), t10);
        assert!(!record.supersede(older, Utc::now()));
        assert_eq!(record.position, newer);
        assert!(!record.supersede(newer.clone(), Utc::now()));

        let newest = Position::new("a", 11.0, 11.0, t10 + Duration::seconds(1)).unwrap();
        assert!(record.supersede(newest.clone(), Utc::now()));
        assert_eq!(record.position, newest);
    }

    #[test]
    fn severity_thresholds() {
        assert_eq!(Severity::from_member_count(1), Severity::Low);
        assert_eq!(Severity::from_member_count(2), Severity::Low);
        assert_eq!(Severity::from_member_count(3), Severity::Medium);
        assert_eq!(Severity::from_member_count(4), Severity::Medium);
        assert_eq!(Severity::from_member_count(5), Severity::High);
        assert_eq!(Severity::from_member_count(50), Severity::High);
    }

    #[test]
    fn display_title_falls_back_to_description() {
        let report = IncidentReport::new("r1", 1.0, 1.0, "Flooded underpass").unwrap();
        assert_eq!(report.display_title(), "Flooded underpass");
        let titled = report.with_title("Flood");
        assert_eq!(titled.display_title(), "Flood");
    }

    #[test]
    fn three_level_labels() {
        let scale = AlertScale::ThreeLevel;
        assert_eq!(scale.label(RiskLevel::Safe), "safe");
        assert_eq!(scale.label(RiskLevel::Medium), "warning");
        assert_eq!(scale.label(RiskLevel::High), "danger");
        assert_eq!(AlertScale::parse("three"), Some(AlertScale::ThreeLevel));
    }
}
