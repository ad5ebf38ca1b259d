//! Exponential backoff with jitter.
//!
//! Used by background loops that poll external dependencies and by the
//! cache layer to bypass an unreachable remote tier, so outages don't
//! cause tight retry loops and log storms.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
    next_attempt_at: Instant,
    jitter_ratio: f64,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
            next_attempt_at: Instant::now(),
            jitter_ratio: 0.2,
            failures: 0,
        }
    }

    pub fn ready(&self) -> bool {
        Instant::now() >= self.next_attempt_at
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn is_tripped(&self) -> bool {
        self.failures > 0
    }

    pub fn reset(&mut self) {
        self.current = self.base;
        self.next_attempt_at = Instant::now();
        self.failures = 0;
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn fail(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.current = self.current.saturating_mul(2).min(self.max);
        let delay = add_jitter(self.current, self.jitter_ratio);
        self.next_attempt_at = Instant::now() + delay;
        delay
    }
}

fn add_jitter(delay: Duration, ratio: f64) -> Duration {
    if !(0.0..=1.0).contains(&ratio) {
        return delay;
    }

    let delay_ms = delay.as_millis();
    if delay_ms == 0 {
        return delay;
    }

    let jitter_ms_max = ((delay_ms as f64) * ratio) as u128;
    if jitter_ms_max == 0 {
        return delay;
    }

    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let jitter_ms = (now_nanos as u128) % (jitter_ms_max + 1);
    delay + Duration::from_millis(jitter_ms as u64)
}
