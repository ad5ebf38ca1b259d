//! Tunable thresholds for clustering, alerts and presence.

use serde::{Deserialize, Serialize};

use crate::models::AlertScale;

/// Configuration for incident clustering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRules {
    /// Maximum distance from a running centroid for a report to join it (meters)
    pub cluster_radius_m: f64,
    /// Zone radius before any members are counted (meters)
    pub base_radius_m: f64,
    /// Radius added per member (meters)
    pub radius_per_member_m: f64,
    /// Upper bound on zone radius (meters)
    pub max_radius_m: f64,
}

impl Default for ClusterRules {
    fn default() -> Self {
        Self {
            cluster_radius_m: 300.0,
            base_radius_m: 140.0,
            radius_per_member_m: 20.0,
            max_radius_m: 260.0,
        }
    }
}

impl ClusterRules {
    /// Zone radius for a cluster of `member_count` reports.
    pub fn zone_radius(&self, member_count: usize) -> f64 {
        (self.base_radius_m + self.radius_per_member_m * member_count as f64).min(self.max_radius_m)
    }
}

/// Configuration for the per-viewer alert state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRules {
    pub scale: AlertScale,
    /// Edge distance at or below which the middle tier applies (meters)
    pub warning_buffer_m: f64,
    /// Edge distance at or below which `low` applies, four-level scale only (meters)
    pub low_buffer_m: f64,
    /// Extra distance required past a boundary before de-escalating (meters)
    pub hysteresis_m: f64,
}

impl Default for AlertRules {
    fn default() -> Self {
        Self {
            scale: AlertScale::FourLevel,
            warning_buffer_m: 200.0,
            low_buffer_m: 400.0,
            hysteresis_m: 25.0,
        }
    }
}

/// Configuration for live presence tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRules {
    /// Below this map zoom no individual presence is returned
    pub min_zoom: f64,
    /// Records older than this are flagged stale but still shown (seconds)
    pub stale_after_secs: u64,
    /// Records older than this are removed by the sweep (seconds)
    pub expire_after_secs: u64,
}

impl Default for PresenceRules {
    fn default() -> Self {
        Self {
            min_zoom: 12.0,
            stale_after_secs: 30,
            expire_after_secs: 120,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_radius_grows_then_caps() {
        let rules = ClusterRules::default();
        assert_eq!(rules.zone_radius(1), 160.0);
        assert_eq!(rules.zone_radius(3), 200.0);
        assert_eq!(rules.zone_radius(6), 260.0);
        assert_eq!(rules.zone_radius(40), 260.0);

        let mut last = 0.0;
        for n in 1..20 {
            let radius = rules.zone_radius(n);
            assert!(radius >= last);
            last = radius;
        }
    }
}
