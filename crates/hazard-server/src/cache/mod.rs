//! Two-tier cache: a short-lived in-process tier in front of a shared
//! remote tier.
//!
//! The cache is an accelerator, never a correctness dependency. Remote
//! failures are logged and the layer falls back to local-only operation
//! until a backoff window elapses. Invalidation by pattern may evict more
//! than strictly necessary but never less.

pub mod keys;
pub mod memory;
pub mod pattern;
pub mod redis;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;

use crate::backoff::Backoff;
use crate::error::CacheError;
use crate::ports::RemoteCacheTier;

pub use memory::MemoryTier;
pub use redis::RedisTier;

const REMOTE_BACKOFF_BASE: Duration = Duration::from_millis(500);
const REMOTE_BACKOFF_MAX: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct LocalEntry {
    value: String,
    stored_at: Instant,
    expires_at: Instant,
}

/// Point-in-time view of cache health.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub local_entries: usize,
    pub remote_configured: bool,
    pub remote_available: bool,
    pub remote_failures: u32,
}

pub struct CacheLayer {
    local: DashMap<String, LocalEntry>,
    remote: Option<Arc<dyn RemoteCacheTier>>,
    remote_backoff: Mutex<Backoff>,
    /// Upper bound on how long a remote hit lives in the local tier. The
    /// writer's remaining TTL bounds it further.
    backfill_ttl: Duration,
}

impl CacheLayer {
    /// Local tier only.
    pub fn local_only(backfill_ttl: Duration) -> Self {
        Self::new(None, backfill_ttl)
    }

    pub fn new(remote: Option<Arc<dyn RemoteCacheTier>>, backfill_ttl: Duration) -> Self {
        Self {
            local: DashMap::new(),
            remote,
            remote_backoff: Mutex::new(Backoff::new(REMOTE_BACKOFF_BASE, REMOTE_BACKOFF_MAX)),
            backfill_ttl: backfill_ttl.max(Duration::from_millis(1)),
        }
    }

    /// Read a value. Expired local entries are treated as absent and removed.
    pub async fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.get_local(key) {
            return Some(value);
        }

        let remote = self.remote_if_ready()?;
        match remote.get(key).await {
            Ok(Some(entry)) => {
                self.remote_succeeded();
                // Never outlive the expiry the writer set.
                let ttl = entry
                    .ttl_remaining
                    .map_or(self.backfill_ttl, |left| left.min(self.backfill_ttl));
                if !ttl.is_zero() {
                    self.put_local(key, entry.value.clone(), ttl);
                }
                Some(entry.value)
            }
            Ok(None) => {
                self.remote_succeeded();
                None
            }
            Err(err) => {
                self.remote_failed("get", &err);
                None
            }
        }
    }

    /// Overwrite `key` in both tiers. Every write states its own staleness bound.
    pub async fn set(&self, key: &str, value: String, ttl: Duration) {
        if ttl.is_zero() {
            self.delete(key).await;
            return;
        }
        self.put_local(key, value.clone(), ttl);

        let Some(remote) = self.remote_if_ready() else {
            return;
        };
        match remote.set_with_ttl(key, &value, ttl).await {
            Ok(()) => self.remote_succeeded(),
            Err(err) => self.remote_failed("set", &err),
        }
    }

    pub async fn delete(&self, key: &str) {
        self.local.remove(key);
        let Some(remote) = self.remote_if_ready() else {
            return;
        };
        match remote.delete_keys(&[key.to_string()]).await {
            Ok(_) => self.remote_succeeded(),
            Err(err) => self.remote_failed("delete", &err),
        }
    }

    /// Remove every entry whose key matches the glob `pattern`.
    ///
    /// Returns how many local entries were removed.
    pub async fn delete_by_pattern(&self, pattern: &str) -> usize {
        let removed = match pattern::glob_to_regex(pattern) {
            Ok(re) => {
                let matching: Vec<String> = self
                    .local
                    .iter()
                    .filter(|entry| re.is_match(entry.key()))
                    .map(|entry| entry.key().clone())
                    .collect();
                matching
                    .iter()
                    .filter(|key| self.local.remove(key.as_str()).is_some())
                    .count()
            }
            Err(err) => {
                tracing::warn!("Cache pattern {:?} invalid ({}); clearing local tier", pattern, err);
                let count = self.local.len();
                self.local.clear();
                count
            }
        };

        if let Some(remote) = self.remote_if_ready() {
            let result = match remote.list_keys_matching(pattern).await {
                Ok(keys) => remote.delete_keys(&keys).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(count) => {
                    self.remote_succeeded();
                    tracing::debug!(
                        "Invalidated {} (local {}, remote {})",
                        pattern,
                        removed,
                        count
                    );
                }
                Err(err) => self.remote_failed("delete_by_pattern", &err),
            }
        }

        removed
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!("Dropping undecodable cache entry {}: {}", key, err);
                self.local.remove(key);
                None
            }
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        match encode(value) {
            Ok(raw) => self.set(key, raw, ttl).await,
            Err(err) => tracing::warn!("Skipping cache write for {}: {}", key, err),
        }
    }

    /// Drop expired local entries, then the oldest ones beyond `max_entries`.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&self, max_entries: usize) -> usize {
        let now = Instant::now();
        let before = self.local.len();
        self.local.retain(|_, entry| entry.expires_at > now);

        if self.local.len() > max_entries {
            let mut entries: Vec<(String, Instant)> = self
                .local
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().stored_at))
                .collect();
            entries.sort_by_key(|(_, stored_at)| *stored_at);
            for (key, _) in entries {
                if self.local.len() <= max_entries {
                    break;
                }
                self.local.remove(&key);
            }
        }

        before.saturating_sub(self.local.len())
    }

    pub fn stats(&self) -> CacheStats {
        let (available, failures) = match self.remote_backoff.lock() {
            Ok(backoff) => (!backoff.is_tripped(), backoff.failures()),
            Err(_) => (false, 0),
        };
        CacheStats {
            local_entries: self.local.len(),
            remote_configured: self.remote.is_some(),
            remote_available: self.remote.is_some() && available,
            remote_failures: failures,
        }
    }

    fn get_local(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let hit = self
            .local
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone());
        if hit.is_none() {
            self.local.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        hit
    }

    fn put_local(&self, key: &str, value: String, ttl: Duration) {
        let now = Instant::now();
        self.local.insert(
            key.to_string(),
            LocalEntry {
                value,
                stored_at: now,
                expires_at: now + ttl,
            },
        );
    }

    fn remote_if_ready(&self) -> Option<&Arc<dyn RemoteCacheTier>> {
        let remote = self.remote.as_ref()?;
        let ready = self
            .remote_backoff
            .lock()
            .map(|backoff| backoff.ready())
            .unwrap_or(false);
        ready.then_some(remote)
    }

    fn remote_succeeded(&self) {
        if let Ok(mut backoff) = self.remote_backoff.lock() {
            if backoff.is_tripped() {
                backoff.reset();
                tracing::info!("Remote cache tier recovered");
            }
        }
    }

    fn remote_failed(&self, op: &str, err: &CacheError) {
        if let Ok(mut backoff) = self.remote_backoff.lock() {
            let delay = backoff.fail();
            tracing::warn!(
                "Remote cache {} failed: {} (local-only for {:?})",
                op,
                err,
                delay
            );
        }
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, CacheError> {
    Ok(serde_json::to_string(value)?)
}
