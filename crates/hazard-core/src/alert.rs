//! Per-viewer hysteretic alert state.
//!
//! Levels are derived from the distance between a viewer and the edge of
//! the nearest hazard zone. Escalation is immediate; de-escalation only
//! happens once the viewer is `hysteresis_m` past the boundary of the
//! current level. A dismissed level stays silent until the level changes.

use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;
use crate::models::{AlertScale, HazardZone, RiskAssessment, RiskLevel};
use crate::rules::AlertRules;

/// Mutable alert memory for one viewer. Starts safe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    level: Option<RiskLevel>,
    dismissed: Option<RiskLevel>,
}

impl AlertState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self) -> RiskLevel {
        self.level.unwrap_or(RiskLevel::Safe)
    }

    pub fn dismissed(&self) -> Option<RiskLevel> {
        self.dismissed
    }

    /// Dismiss the current level. Returns false when there is nothing to dismiss.
    pub fn dismiss(&mut self) -> bool {
        let level = self.level();
        if level == RiskLevel::Safe {
            return false;
        }
        self.dismissed = Some(level);
        true
    }

    /// Whether the current level should be shown to the viewer.
    pub fn should_display(&self) -> bool {
        let level = self.level();
        level != RiskLevel::Safe && self.dismissed != Some(level)
    }

    fn transition(&mut self, next: RiskLevel) -> bool {
        let current = self.level();
        if next == current {
            return false;
        }
        if next == RiskLevel::Safe || self.dismissed != Some(next) {
            self.dismissed = None;
        }
        self.level = Some(next);
        true
    }
}

/// Result of feeding a new observation into an [`AlertState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertUpdate {
    pub assessment: RiskAssessment,
    /// Level differs from the previous observation
    pub changed: bool,
    /// Caller should show (or keep showing) the alert
    pub display: bool,
}

/// Maps viewer/zone geometry to risk levels.
#[derive(Debug, Clone, Default)]
pub struct AlertStateMachine {
    rules: AlertRules,
}

impl AlertStateMachine {
    pub fn new(rules: AlertRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &AlertRules {
        &self.rules
    }

    pub fn scale(&self) -> AlertScale {
        self.rules.scale
    }

    /// Stateless assessment of a viewer against the current zone set.
    pub fn evaluate(&self, viewer: &GeoPoint, zones: &[HazardZone]) -> RiskAssessment {
        match nearest_edge(viewer, zones) {
            Some((zone, edge)) => self.assessment(self.level_for_edge(edge), zone, edge),
            None => RiskAssessment::safe(self.rules.scale),
        }
    }

    /// Feed an observation into `state`, applying hysteresis and dismiss memory.
    pub fn advance(
        &self,
        state: &mut AlertState,
        viewer: &GeoPoint,
        zones: &[HazardZone],
    ) -> AlertUpdate {
        let Some((zone, edge)) = nearest_edge(viewer, zones) else {
            let changed = state.transition(RiskLevel::Safe);
            return AlertUpdate {
                assessment: RiskAssessment::safe(self.rules.scale),
                changed,
                display: false,
            };
        };

        let raw = self.level_for_edge(edge);
        let current = state.level();
        let next = if raw >= current {
            raw
        } else {
            self.held_level(current, raw, edge)
        };

        let changed = state.transition(next);
        AlertUpdate {
            assessment: self.assessment(next, zone, edge),
            changed,
            display: state.should_display(),
        }
    }

    fn level_for_edge(&self, edge: f64) -> RiskLevel {
        if edge <= 0.0 {
            RiskLevel::High
        } else if edge <= self.rules.warning_buffer_m {
            RiskLevel::Medium
        } else if self.rules.scale == AlertScale::FourLevel && edge <= self.rules.low_buffer_m {
            RiskLevel::Low
        } else {
            RiskLevel::Safe
        }
    }

    /// Outer edge distance of the band that produces `level`.
    fn boundary(&self, level: RiskLevel) -> Option<f64> {
        match level {
            RiskLevel::High => Some(0.0),
            RiskLevel::Medium => Some(self.rules.warning_buffer_m),
            RiskLevel::Low if self.rules.scale == AlertScale::FourLevel => {
                Some(self.rules.low_buffer_m)
            }
            RiskLevel::Low | RiskLevel::Safe => None,
        }
    }

    /// Highest level between `raw` and `current` still inside its hysteresis margin.
    fn held_level(&self, current: RiskLevel, raw: RiskLevel, edge: f64) -> RiskLevel {
        for level in [RiskLevel::High, RiskLevel::Medium, RiskLevel::Low] {
            if level > current || level <= raw {
                continue;
            }
            if let Some(boundary) = self.boundary(level) {
                if edge <= boundary + self.rules.hysteresis_m {
                    return level;
                }
            }
        }
        raw
    }

    fn assessment(&self, level: RiskLevel, zone: &HazardZone, edge: f64) -> RiskAssessment {
        RiskAssessment {
            level,
            label: self.rules.scale.label(level).to_string(),
            nearest_zone_id: Some(zone.id.clone()),
            distance_to_edge_m: Some(edge),
        }
    }
}

fn nearest_edge<'a>(viewer: &GeoPoint, zones: &'a [HazardZone]) -> Option<(&'a HazardZone, f64)> {
    zones
        .iter()
        .map(|zone| (zone, zone.distance_to_edge(viewer)))
        .filter(|(_, edge)| edge.is_finite())
        .fold(None, |best, (zone, edge)| match best {
            Some((_, best_edge)) if best_edge <= edge => best,
            _ => Some((zone, edge)),
        })
}
