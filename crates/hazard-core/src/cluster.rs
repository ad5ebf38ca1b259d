//! Greedy proximity clustering of incident reports into hazard zones.
//!
//! Reports are processed strictly in input order: each one joins the
//! nearest existing cluster whose running centroid is within the
//! clustering radius, or starts a new cluster. Identical input order
//! always yields identical zones.

use crate::geo::{distance_meters, wrap_longitude, GeoPoint};
use crate::models::{HazardZone, IncidentReport, Severity};
use crate::rules::ClusterRules;

/// Longitudes are summed as offsets from the seed's longitude so a cluster
/// straddling the antimeridian keeps its centroid on the right side.
#[derive(Debug, Clone)]
struct Cluster<'a> {
    anchor_lng: f64,
    sum_lat: f64,
    sum_dlng: f64,
    members: Vec<&'a IncidentReport>,
}

impl<'a> Cluster<'a> {
    fn seed(report: &'a IncidentReport) -> Self {
        Self {
            anchor_lng: report.longitude,
            sum_lat: report.latitude,
            sum_dlng: 0.0,
            members: vec![report],
        }
    }

    fn centroid(&self) -> GeoPoint {
        let count = self.members.len() as f64;
        GeoPoint::new(
            self.sum_lat / count,
            wrap_longitude(self.anchor_lng + self.sum_dlng / count),
        )
    }

    fn push(&mut self, report: &'a IncidentReport) {
        self.sum_lat += report.latitude;
        self.sum_dlng += wrap_longitude(report.longitude - self.anchor_lng);
        self.members.push(report);
    }
}

/// Groups raw reports into zones with a severity classification.
#[derive(Debug, Clone, Default)]
pub struct IncidentClusterer {
    rules: ClusterRules,
}

impl IncidentClusterer {
    pub fn new(rules: ClusterRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ClusterRules {
        &self.rules
    }

    /// Run one clustering pass.
    ///
    /// Every report ends up in exactly one zone. When two clusters are
    /// equidistant the one created first wins.
    pub fn cluster(&self, reports: &[IncidentReport]) -> Vec<HazardZone> {
        let mut clusters: Vec<Cluster<'_>> = Vec::new();

        for report in reports {
            let point = report.point();
            let mut best: Option<(usize, f64)> = None;
            for (idx, cluster) in clusters.iter().enumerate() {
                let distance = distance_meters(&point, &cluster.centroid());
                // Strict comparison keeps the earliest cluster on ties.
                let closer = best.map(|(_, d)| distance < d).unwrap_or(true);
                if closer {
                    best = Some((idx, distance));
                }
            }

            match best {
                Some((idx, distance)) if distance <= self.rules.cluster_radius_m => {
                    clusters[idx].push(report);
                }
                _ => clusters.push(Cluster::seed(report)),
            }
        }

        clusters
            .into_iter()
            .map(|cluster| self.to_zone(cluster))
            .collect()
    }

    fn to_zone(&self, cluster: Cluster<'_>) -> HazardZone {
        let center = cluster.centroid();
        let member_count = cluster.members.len();
        HazardZone {
            id: format!("zone-{}", cluster.members[0].id),
            center_lat: center.lat,
            center_lng: center.lng,
            radius_m: self.rules.zone_radius(member_count),
            severity: Severity::from_member_count(member_count),
            member_count,
            titles: cluster
                .members
                .iter()
                .map(|report| report.display_title().to_string())
                .collect(),
            member_ids: cluster.members.iter().map(|report| report.id.clone()).collect(),
        }
    }
}
