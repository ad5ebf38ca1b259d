//! Spatial math for presence filtering, clustering and alert distances.

use serde::{Deserialize, Serialize};

use crate::error::{validate_coordinates, ValidationError};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude for the local equirectangular approximation.
pub const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// Smallest cosine used when scaling longitude, keeps polar math finite.
const MIN_COS_LAT: f64 = 1e-6;

/// A bare WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Build a point after checking the coordinate ranges.
    pub fn checked(lat: f64, lng: f64) -> Result<Self, ValidationError> {
        validate_coordinates(lat, lng)?;
        Ok(Self { lat, lng })
    }
}

/// Calculate distance between two points in meters using the haversine formula.
///
/// Symmetric in its arguments and exactly zero for identical points.
pub fn haversine_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lng2 - lng1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Great-circle distance between two points in meters.
pub fn distance_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    haversine_distance(a.lat, a.lng, b.lat, b.lng)
}

/// Convert a north/south offset in meters to degrees latitude.
pub fn meters_to_lat(meters: f64) -> f64 {
    meters / METERS_PER_DEG_LAT
}

/// Convert an east/west offset in meters to degrees longitude at `ref_lat_deg`.
pub fn meters_to_lng(meters: f64, ref_lat_deg: f64) -> f64 {
    let cos_lat = ref_lat_deg.to_radians().cos().abs().max(MIN_COS_LAT);
    meters / (METERS_PER_DEG_LAT * cos_lat)
}

/// Axis-aligned square approximating a circle of `radius_m` around `center`.
///
/// Returns a closed ring (first point repeated last), counter-clockwise from
/// the south-west corner. Near the poles the longitude half-width grows large
/// but stays finite.
pub fn square_polygon(center: &GeoPoint, radius_m: f64) -> [GeoPoint; 5] {
    let dlat = meters_to_lat(radius_m);
    let dlng = meters_to_lng(radius_m, center.lat);

    let south_west = GeoPoint::new(center.lat - dlat, center.lng - dlng);
    [
        south_west,
        GeoPoint::new(center.lat - dlat, center.lng + dlng),
        GeoPoint::new(center.lat + dlat, center.lng + dlng),
        GeoPoint::new(center.lat + dlat, center.lng - dlng),
        south_west,
    ]
}

/// Wrap a longitude in degrees into [-180, 180).
pub fn wrap_longitude(lng: f64) -> f64 {
    (lng + 180.0).rem_euclid(360.0) - 180.0
}

/// Offset a position by distance and bearing.
///
/// # Arguments
/// * `origin` - Starting position
/// * `distance_m` - Distance in meters
/// * `bearing_rad` - Bearing in radians (0 = north, π/2 = east)
pub fn offset_by_bearing(origin: &GeoPoint, distance_m: f64, bearing_rad: f64) -> GeoPoint {
    if distance_m.abs() <= f64::EPSILON {
        return *origin;
    }

    let lat1 = origin.lat.to_radians();
    let lng1 = origin.lng.to_radians();
    let angular_distance = distance_m / EARTH_RADIUS_M;

    let sin_lat1 = lat1.sin();
    let cos_lat1 = lat1.cos();
    let sin_ad = angular_distance.sin();
    let cos_ad = angular_distance.cos();

    let sin_lat2 = sin_lat1 * cos_ad + cos_lat1 * sin_ad * bearing_rad.cos();
    let lat2 = sin_lat2.clamp(-1.0, 1.0).asin();

    let y = bearing_rad.sin() * sin_ad * cos_lat1;
    let x = cos_ad - sin_lat1 * sin_lat2;
    let mut lng2 = lng1 + y.atan2(x);
    lng2 =
        (lng2 + std::f64::consts::PI).rem_euclid(2.0 * std::f64::consts::PI) - std::f64::consts::PI;

    GeoPoint::new(lat2.to_degrees(), lng2.to_degrees())
}

/// Viewport or query window in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    /// Validated constructor. `west > east` is allowed and means the box
    /// crosses the antimeridian.
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self, ValidationError> {
        validate_coordinates(south, west)?;
        validate_coordinates(north, east)?;
        if south > north {
            return Err(ValidationError::InvertedBounds { south, north });
        }
        Ok(Self {
            west,
            south,
            east,
            north,
        })
    }

    /// Box circumscribing a circle of `radius_m` around `center`.
    pub fn around(center: &GeoPoint, radius_m: f64) -> Self {
        let dlat = meters_to_lat(radius_m);
        let dlng = meters_to_lng(radius_m, center.lat).min(180.0);
        let wrap = |lng: f64| {
            if lng > 180.0 {
                lng - 360.0
            } else if lng < -180.0 {
                lng + 360.0
            } else {
                lng
            }
        };
        Self {
            west: wrap(center.lng - dlng),
            south: (center.lat - dlat).max(-90.0),
            east: wrap(center.lng + dlng),
            north: (center.lat + dlat).min(90.0),
        }
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        if point.lat < self.south || point.lat > self.north {
            return false;
        }
        if self.west <= self.east {
            point.lng >= self.west && point.lng <= self.east
        } else {
            point.lng >= self.west || point.lng <= self.east
        }
    }

    pub fn center(&self) -> GeoPoint {
        let lat = (self.south + self.north) / 2.0;
        let lng = if self.west <= self.east {
            (self.west + self.east) / 2.0
        } else {
            let mid = (self.west + self.east + 360.0) / 2.0;
            if mid > 180.0 {
                mid - 360.0
            } else {
                mid
            }
        };
        GeoPoint::new(lat, lng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distance() {
        // ~111km between these points (1 degree latitude)
        let dist = haversine_distance(0.0, 0.0, 1.0, 0.0);
        assert!((dist - 111_194.0).abs() < 100.0);
    }

    #[test]
    fn test_haversine_same_point() {
        let a = GeoPoint::new(33.6846, -117.8265);
        assert_eq!(distance_meters(&a, &a), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = GeoPoint::new(40.7128, -74.0060);
        let b = GeoPoint::new(40.7306, -73.9352);
        assert_eq!(distance_meters(&a, &b), distance_meters(&b, &a));
    }

    #[test]
    fn distance_matches_bearing_offset_under_50km() {
        let origin = GeoPoint::new(51.5, -0.12);
        for meters in [50.0, 1_000.0, 12_345.0, 49_000.0] {
            let moved = offset_by_bearing(&origin, meters, 1.1);
            let measured = distance_meters(&origin, &moved);
            let error = (measured - meters).abs() / meters;
            assert!(error < 0.001, "{meters}m measured as {measured}m");
        }
    }

    #[test]
    fn square_polygon_is_closed_and_sized() {
        let center = GeoPoint::new(33.0, -117.0);
        let ring = square_polygon(&center, 200.0);
        assert_eq!(ring[0], ring[4]);

        let south_edge = distance_meters(&ring[0], &ring[1]);
        let west_edge = distance_meters(&ring[0], &ring[3]);
        assert!((south_edge - 400.0).abs() < 4.0, "south edge {south_edge}");
        assert!((west_edge - 400.0).abs() < 4.0, "west edge {west_edge}");
    }

    #[test]
    fn square_polygon_stays_finite_at_poles() {
        for lat in [90.0, -90.0, 89.999_999] {
            let ring = square_polygon(&GeoPoint::new(lat, 10.0), 150.0);
            assert!(ring.iter().all(|p| p.lat.is_finite() && p.lng.is_finite()));
        }
    }

    #[test]
    fn wrap_longitude_folds_into_range() {
        assert_eq!(wrap_longitude(10.0), 10.0);
        assert_eq!(wrap_longitude(181.0), -179.0);
        assert_eq!(wrap_longitude(-181.0), 179.0);
        assert_eq!(wrap_longitude(540.0), -180.0);
    }

    #[test]
    fn bounding_box_around_contains_circle() {
        let center = GeoPoint::new(48.85, 2.35);
        let bbox = BoundingBox::around(&center, 500.0);
        assert!(bbox.contains(&center));
        assert!(bbox.contains(&offset_by_bearing(&center, 480.0, 0.7)));
        assert!(!bbox.contains(&offset_by_bearing(&center, 900.0, 0.0)));
        let mid = bbox.center();
        assert!(distance_meters(&mid, &center) < 1.0);
    }

    #[test]
    fn bounding_box_across_antimeridian() {
        let bbox = BoundingBox::new(179.0, -1.0, -179.0, 1.0).unwrap();
        assert!(bbox.contains(&GeoPoint::new(0.0, 179.5)));
        assert!(bbox.contains(&GeoPoint::new(0.0, -179.5)));
        assert!(!bbox.contains(&GeoPoint::new(0.0, 0.0)));
    }

    #[test]
    fn bounding_box_rejects_inverted_latitudes() {
        assert!(matches!(
            BoundingBox::new(0.0, 10.0, 1.0, 5.0),
            Err(ValidationError::InvertedBounds { .. })
        ));
    }
}
