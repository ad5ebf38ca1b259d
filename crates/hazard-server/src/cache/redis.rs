//! Remote cache tier backed by `Dragonfly` (Redis-compatible).

use std::time::Duration;

use async_trait::async_trait;
use fred::prelude::*;
use futures::TryStreamExt;

use crate::error::CacheError;
use crate::ports::{RemoteCacheTier, RemoteEntry};

const SCAN_PAGE_SIZE: u32 = 200;

/// Connection handle to a Redis-compatible server.
#[derive(Clone)]
pub struct RedisTier {
    client: Client,
}

impl RedisTier {
    /// Connect to the shared cache at the given URL.
    ///
    /// The URL should follow the Redis URL scheme:
    /// `redis://host:port` or `redis://host:port/db`
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let config = Config::from_url(url)
            .map_err(|e| CacheError::Unavailable(format!("Invalid cache URL: {e}")))?;

        let client = Builder::from_config(config)
            .set_policy(ReconnectPolicy::new_exponential(0, 100, 30_000, 2))
            .build()?;
        client.init().await?;

        tracing::info!("Connected to remote cache tier");
        Ok(Self { client })
    }
}

#[async_trait]
impl RemoteCacheTier for RedisTier {
    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, CacheError> {
        let pipeline = self.client.pipeline();
        let _: () = pipeline.get(key).await?;
        let _: () = pipeline.pttl(key).await?;
        let (value, pttl): (Option<String>, i64) = pipeline.all().await?;

        // PTTL: -2 missing (expired between the two reads), -1 no expiry
        let ttl_remaining = match pttl {
            -2 => return Ok(None),
            ms if ms < 0 => None,
            ms => Some(Duration::from_millis(ms.unsigned_abs())),
        };
        Ok(value.map(|value| RemoteEntry {
            value,
            ttl_remaining,
        }))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let ttl_ms = i64::try_from(ttl.as_millis().max(1)).unwrap_or(i64::MAX);
        let _: () = self
            .client
            .set(key, value, Some(Expiration::PX(ttl_ms)), None, false)
            .await?;
        Ok(())
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = self.client.del(keys.to_vec()).await?;
        Ok(removed)
    }

    async fn list_keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut scan = Box::pin(self.client.scan_buffered(pattern, Some(SCAN_PAGE_SIZE), None));
        let mut keys = Vec::new();
        while let Some(key) = scan.try_next().await? {
            if let Some(key) = key.into_string() {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}
