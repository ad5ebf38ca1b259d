//! In-process stand-in for the remote tier.
//!
//! Lets several `CacheLayer`s in one process share a tier (tests,
//! single-node development) and can be switched offline to exercise
//! degraded operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::pattern::glob_to_regex;
use crate::error::CacheError;
use crate::ports::{RemoteCacheTier, RemoteEntry};

#[derive(Default)]
pub struct MemoryTier {
    entries: DashMap<String, (String, Instant)>,
    offline: AtomicBool,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails until brought back online.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_online(&self) -> Result<(), CacheError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("memory tier offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteCacheTier for MemoryTier {
    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, CacheError> {
        self.check_online()?;
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .filter(|entry| entry.value().1 > now)
            .map(|entry| RemoteEntry {
                value: entry.value().0.clone(),
                ttl_remaining: Some(entry.value().1 - now),
            });
        if hit.is_none() {
            self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
        }
        Ok(hit)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.check_online()?;
        let expires_at = Instant::now() + ttl.max(Duration::from_millis(1));
        self.entries
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<u64, CacheError> {
        self.check_online()?;
        let removed = keys
            .iter()
            .filter(|key| self.entries.remove(key.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn list_keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.check_online()?;
        let re = glob_to_regex(pattern).map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(self
            .entries
            .iter()
            .filter(|entry| re.is_match(entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sub_second_ttl_is_kept_and_reported() {
        let tier = MemoryTier::new();
        tier.set_with_ttl("k", "v", Duration::from_millis(200))
            .await
            .unwrap();

        let hit = tier.get("k").await.unwrap().unwrap();
        assert_eq!(hit.value, "v");
        assert_eq!(hit.ttl_remaining, Some(Duration::from_millis(200)));

        tokio::time::advance(Duration::from_millis(201)).await;
        assert_eq!(tier.get("k").await.unwrap(), None);
        assert!(tier.is_empty());
    }
}
