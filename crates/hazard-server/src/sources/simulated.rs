//! Simulated positioning: walks a circle around a fixed point.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use hazard_core::CircularWalk;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::error::PositionError;
use crate::ports::{PositionFix, PositionSource, PositionStream};

/// Horizontal accuracy reported with every simulated fix (meters).
const SIMULATED_ACCURACY_M: f64 = 5.0;

pub struct SimulatedPositionSource {
    walk: CircularWalk,
    period: Duration,
}

impl SimulatedPositionSource {
    pub fn new(walk: CircularWalk, period: Duration) -> Self {
        Self {
            walk,
            period: period.max(Duration::from_millis(10)),
        }
    }
}

#[async_trait]
impl PositionSource for SimulatedPositionSource {
    async fn subscribe(&self) -> Result<PositionStream, PositionError> {
        let walk = self.walk.clone();
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let started = Instant::now();

        Ok(stream::unfold(ticker, move |mut ticker| {
            let walk = walk.clone();
            async move {
                ticker.tick().await;
                let point = walk.position_at(started.elapsed().as_secs_f64());
                let fix = PositionFix {
                    latitude: point.lat,
                    longitude: point.lng,
                    timestamp: Utc::now(),
                    accuracy_m: Some(SIMULATED_ACCURACY_M),
                };
                Some((Ok(fix), ticker))
            }
        })
        .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hazard_core::{distance_meters, GeoPoint};

    #[tokio::test(start_paused = true)]
    async fn fixes_stay_on_the_circle() {
        let center = GeoPoint::new(37.7749, -122.4194);
        let source = SimulatedPositionSource::new(
            CircularWalk::new(center, 100.0, 2.0),
            Duration::from_secs(1),
        );
        let fixes: Vec<PositionFix> = source
            .subscribe()
            .await
            .unwrap()
            .take(3)
            .map(|fix| fix.unwrap())
            .collect()
            .await;

        assert_eq!(fixes.len(), 3);
        for fix in &fixes {
            let d = distance_meters(&center, &GeoPoint::new(fix.latitude, fix.longitude));
            assert!((d - 100.0).abs() < 1.0, "distance {d}");
        }
        assert_ne!(fixes[0].latitude, fixes[2].latitude);
    }
}
