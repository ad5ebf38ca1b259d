//! Per-viewer alert registry.
//!
//! Each viewer gets its own [`AlertState`]; the last observed location is
//! kept so the whole registry can be re-evaluated when the zone set changes.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hazard_core::{AlertState, AlertStateMachine, AlertUpdate, GeoPoint, HazardZone, RiskLevel};
use serde::Serialize;

#[derive(Debug, Clone)]
struct ViewerAlert {
    state: AlertState,
    last_point: GeoPoint,
    last_update: AlertUpdate,
    updated_at: DateTime<Utc>,
    /// Last time the viewer itself reported a location
    observed_at: DateTime<Utc>,
}

/// Current alert for a viewer as served to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ViewerAlertView {
    pub viewer_id: String,
    #[serde(flatten)]
    pub update: AlertUpdate,
    pub dismissed: Option<RiskLevel>,
    pub updated_at: DateTime<Utc>,
}

pub struct ViewerAlerts {
    viewers: DashMap<String, ViewerAlert>,
    machine: AlertStateMachine,
}

impl ViewerAlerts {
    pub fn new(machine: AlertStateMachine) -> Self {
        Self {
            viewers: DashMap::new(),
            machine,
        }
    }

    pub fn machine(&self) -> &AlertStateMachine {
        &self.machine
    }

    /// Feed a new viewer location.
    pub fn observe(&self, viewer_id: &str, point: GeoPoint, zones: &[HazardZone]) -> ViewerAlertView {
        let mut entry = self
            .viewers
            .entry(viewer_id.to_string())
            .or_insert_with(|| ViewerAlert {
                state: AlertState::new(),
                last_point: point,
                last_update: AlertUpdate {
                    assessment: hazard_core::RiskAssessment::safe(self.machine.scale()),
                    changed: false,
                    display: false,
                },
                updated_at: Utc::now(),
                observed_at: Utc::now(),
            });

        let alert = entry.value_mut();
        let update = self.machine.advance(&mut alert.state, &point, zones);
        if update.changed {
            tracing::debug!(
                "Viewer {} alert -> {} ({:?} m to {:?})",
                viewer_id,
                update.assessment.label,
                update.assessment.distance_to_edge_m.map(|d| d.round()),
                update.assessment.nearest_zone_id
            );
        }
        alert.last_point = point;
        alert.last_update = update;
        alert.updated_at = Utc::now();
        alert.observed_at = alert.updated_at;
        view(viewer_id, alert)
    }

    /// Dismiss the viewer's current alert. `None` if the viewer is unknown.
    pub fn dismiss(&self, viewer_id: &str) -> Option<ViewerAlertView> {
        let mut entry = self.viewers.get_mut(viewer_id)?;
        let alert = entry.value_mut();
        if alert.state.dismiss() {
            alert.last_update.display = alert.state.should_display();
            alert.updated_at = Utc::now();
        }
        Some(view(viewer_id, alert))
    }

    pub fn current(&self, viewer_id: &str) -> Option<ViewerAlertView> {
        self.viewers.get(viewer_id).map(|entry| view(viewer_id, entry.value()))
    }

    /// Re-run every viewer against a new zone set. Returns how many changed level.
    pub fn reevaluate_all(&self, zones: &[HazardZone]) -> usize {
        let mut changed = 0;
        for mut entry in self.viewers.iter_mut() {
            let alert = entry.value_mut();
            let point = alert.last_point;
            let update = self.machine.advance(&mut alert.state, &point, zones);
            if update.changed {
                changed += 1;
            }
            alert.last_update = update;
            alert.updated_at = Utc::now();
        }
        changed
    }

    /// Drop viewers that have not reported a location since `cutoff`.
    /// Zone re-evaluation does not count as activity.
    pub fn sweep_idle(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.viewers.len();
        self.viewers.retain(|_, alert| alert.observed_at >= cutoff);
        before.saturating_sub(self.viewers.len())
    }

    pub fn forget(&self, viewer_id: &str) -> bool {
        self.viewers.remove(viewer_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.viewers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.viewers.is_empty()
    }
}

fn view(viewer_id: &str, alert: &ViewerAlert) -> ViewerAlertView {
    ViewerAlertView {
        viewer_id: viewer_id.to_string(),
        update: alert.last_update.clone(),
        dismissed: alert.state.dismissed(),
        updated_at: alert.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hazard_core::{AlertRules, Severity};

    fn zone_at(center: GeoPoint) -> HazardZone {
        HazardZone {
            id: "zone-r1".into(),
            center_lat: center.lat,
            center_lng: center.lng,
            radius_m: 200.0,
            severity: Severity::Medium,
            member_count: 3,
            titles: vec!["Flooding".into()],
            member_ids: vec!["r1".into(), "r2".into(), "r3".into()],
        }
    }

    #[test]
    fn dismiss_silences_until_level_changes() {
        let alerts = ViewerAlerts::new(AlertStateMachine::new(AlertRules::default()));
        let center = GeoPoint::new(37.0, -122.0);
        let zones = vec![zone_at(center)];

        let inside = alerts.observe("v1", center, &zones);
        assert_eq!(inside.update.assessment.level, RiskLevel::High);
        assert!(inside.update.display);

        let dismissed = alerts.dismiss("v1").unwrap();
        assert!(!dismissed.update.display);
        assert_eq!(dismissed.dismissed, Some(RiskLevel::High));

        let still = alerts.observe("v1", center, &zones);
        assert!(!still.update.display);

        let far = GeoPoint::new(38.0, -122.0);
        assert_eq!(alerts.observe("v1", far, &zones).update.assessment.level, RiskLevel::Safe);
        assert!(alerts.observe("v1", center, &zones).update.display);
    }

    #[test]
    fn zone_change_reevaluates_known_viewers() {
        let alerts = ViewerAlerts::new(AlertStateMachine::default());
        let center = GeoPoint::new(37.0, -122.0);
        alerts.observe("v1", center, &[]);
        assert_eq!(alerts.current("v1").unwrap().update.assessment.level, RiskLevel::Safe);

        assert_eq!(alerts.reevaluate_all(&[zone_at(center)]), 1);
        assert_eq!(alerts.current("v1").unwrap().update.assessment.level, RiskLevel::High);
        assert!(alerts.dismiss("unknown").is_none());
        assert!(alerts.forget("v1"));
        assert!(alerts.is_empty());
    }

    #[test]
    fn idle_viewers_are_swept() {
        let alerts = ViewerAlerts::new(AlertStateMachine::default());
        let center = GeoPoint::new(37.0, -122.0);
        alerts.observe("quiet", center, &[]);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let cutoff = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        alerts.observe("active", center, &[]);

        // Re-evaluation touches both but only an observation keeps a viewer.
        alerts.reevaluate_all(&[zone_at(center)]);
        assert_eq!(alerts.sweep_idle(cutoff), 1);
        assert!(alerts.current("quiet").is_none());
        assert!(alerts.current("active").is_some());
    }
}
