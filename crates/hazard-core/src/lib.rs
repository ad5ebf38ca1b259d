pub mod alert;
pub mod cluster;
pub mod error;
pub mod geo;
pub mod models;
pub mod rules;
pub mod walk;

pub use alert::{AlertState, AlertStateMachine, AlertUpdate};
pub use cluster::IncidentClusterer;
pub use error::ValidationError;
pub use geo::{distance_meters, haversine_distance, square_polygon, BoundingBox, GeoPoint};
pub use models::{
    AlertScale, HazardZone, IncidentReport, Position, PresenceRecord, RiskAssessment, RiskLevel,
    Severity,
};
pub use rules::{AlertRules, ClusterRules, PresenceRules};
pub use walk::CircularWalk;
