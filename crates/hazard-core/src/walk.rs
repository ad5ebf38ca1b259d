//! Deterministic walking paths for simulated positioning sources.

use std::f64::consts::PI;

use crate::geo::{meters_to_lat, meters_to_lng, wrap_longitude, GeoPoint};

/// A participant walking a circle around a center point.
#[derive(Debug, Clone)]
pub struct CircularWalk {
    pub center: GeoPoint,
    pub radius_m: f64,
    pub speed_mps: f64,
    pub start_angle: f64,
    pub clockwise: bool,
    period_s: f64,
}

impl CircularWalk {
    /// Create a new circular walk.
    ///
    /// # Arguments
    /// * `center` - Center of the circle
    /// * `radius_m` - Radius in meters
    /// * `speed_mps` - Walking speed in m/s (clamped to a small positive value)
    pub fn new(center: GeoPoint, radius_m: f64, speed_mps: f64) -> Self {
        let speed_mps = speed_mps.max(0.01);
        let circumference = 2.0 * PI * radius_m.max(0.0);
        Self {
            center,
            radius_m: radius_m.max(0.0),
            speed_mps,
            start_angle: 0.0,
            clockwise: false,
            period_s: (circumference / speed_mps).max(f64::EPSILON),
        }
    }

    pub fn with_start_angle(mut self, start_angle: f64, clockwise: bool) -> Self {
        self.start_angle = start_angle;
        self.clockwise = clockwise;
        self
    }

    /// Position after `t` seconds on the path.
    pub fn position_at(&self, t: f64) -> GeoPoint {
        let mut angle_rad = self.start_angle + (2.0 * PI * t / self.period_s);
        if self.clockwise {
            angle_rad = -angle_rad;
        }

        let lat = self.center.lat + meters_to_lat(self.radius_m) * angle_rad.cos();
        let lng = self.center.lng + meters_to_lng(self.radius_m, self.center.lat) * angle_rad.sin();
        GeoPoint::new(lat.clamp(-90.0, 90.0), wrap_longitude(lng))
    }
}
