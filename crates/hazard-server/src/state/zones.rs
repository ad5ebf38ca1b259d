//! Current hazard zone set.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use hazard_core::{BoundingBox, HazardZone};

#[derive(Debug, Clone)]
pub struct ZoneSnapshot {
    pub zones: Arc<Vec<HazardZone>>,
    /// Viewport the zones were computed for, if any
    pub bbox: Option<BoundingBox>,
    pub computed_at: Option<DateTime<Utc>>,
    /// Bumped on every publish
    pub generation: u64,
}

impl Default for ZoneSnapshot {
    fn default() -> Self {
        Self {
            zones: Arc::new(Vec::new()),
            bbox: None,
            computed_at: None,
            generation: 0,
        }
    }
}

/// Readers get a cheap clone of the latest snapshot; writers replace it whole.
#[derive(Default)]
pub struct ZoneBoard {
    current: RwLock<ZoneSnapshot>,
}

impl ZoneBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ZoneSnapshot {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn zones(&self) -> Arc<Vec<HazardZone>> {
        self.snapshot().zones
    }

    /// Replace the zone set. Returns the new generation.
    pub fn publish(&self, zones: Vec<HazardZone>, bbox: Option<BoundingBox>) -> u64 {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let generation = guard.generation + 1;
        *guard = ZoneSnapshot {
            zones: Arc::new(zones),
            bbox,
            computed_at: Some(Utc::now()),
            generation,
        };
        generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_replaces_and_bumps_generation() {
        let board = ZoneBoard::new();
        assert_eq!(board.snapshot().generation, 0);
        assert!(board.zones().is_empty());

        let before = board.zones();
        assert_eq!(board.publish(Vec::new(), None), 1);
        assert_eq!(board.publish(Vec::new(), None), 2);
        assert!(board.snapshot().computed_at.is_some());
        assert!(before.is_empty());
    }
}
