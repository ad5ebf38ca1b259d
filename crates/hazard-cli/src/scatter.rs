//! Random incident reports for seeding a server.

use std::f64::consts::TAU;

use hazard_core::geo::offset_by_bearing;
use hazard_core::{GeoPoint, IncidentReport};
use rand::Rng;

const TITLES: &[&str] = &[
    "Broken glass",
    "Flooded underpass",
    "Fallen tree",
    "Loose paving",
    "Suspicious activity",
    "Unlit street",
];

/// `count` reports uniformly spread within `spread_m` of `center`.
///
/// Ids are `{prefix}-{n}` so reruns overwrite instead of piling up.
pub fn scatter_reports<R: Rng + ?Sized>(
    rng: &mut R,
    center: GeoPoint,
    spread_m: f64,
    count: usize,
    prefix: &str,
) -> Vec<IncidentReport> {
    (0..count)
        .filter_map(|n| {
            // sqrt keeps the density uniform over the disc
            let distance = spread_m.max(0.0) * rng.random::<f64>().sqrt();
            let bearing = rng.random_range(0.0..TAU);
            let point = offset_by_bearing(&center, distance, bearing);
            let title = TITLES[rng.random_range(0..TITLES.len())];
            IncidentReport::new(format!("{prefix}-{n}"), point.lat, point.lng, title)
                .ok()
                .map(|report| report.with_title(title))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hazard_core::distance_meters;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn reports_stay_within_spread() {
        let mut rng = StdRng::seed_from_u64(7);
        let center = GeoPoint::new(37.7749, -122.4194);
        let reports = scatter_reports(&mut rng, center, 500.0, 50, "seed");

        assert_eq!(reports.len(), 50);
        for report in &reports {
            let d = distance_meters(&center, &GeoPoint::new(report.latitude, report.longitude));
            assert!(d <= 501.0, "{} is {d} m out", report.id);
            assert!(report.title.is_some());
        }
        assert_eq!(reports[3].id, "seed-3");
    }

    #[test]
    fn zero_spread_piles_on_center() {
        let mut rng = StdRng::seed_from_u64(1);
        let center = GeoPoint::new(0.0, 0.0);
        let reports = scatter_reports(&mut rng, center, 0.0, 3, "p");
        assert!(reports
            .iter()
            .all(|r| r.latitude.abs() < 1e-9 && r.longitude.abs() < 1e-9));
    }
}
