//! Interfaces to external collaborators.
//!
//! The engine only reaches positioning hardware, durable storage, the
//! realtime change feed, the shared cache and the hazard report source
//! through these traits. Network-backed implementations live in
//! `persistence`, `sync`, `sources` and `cache`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use hazard_core::{BoundingBox, IncidentReport, Position, PresenceRecord};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, HazardError, PositionError};

/// Table name used for presence change notifications.
pub const PRESENCE_TABLE: &str = "presence";

/// One sample from a positioning source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub accuracy_m: Option<f64>,
}

pub type PositionStream = BoxStream<'static, Result<PositionFix, PositionError>>;

/// Device or simulated geolocation.
///
/// Dropping the returned stream cancels the subscription.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn subscribe(&self) -> Result<PositionStream, PositionError>;
}

/// Durable presence storage shared by every server instance.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn upsert_position(&self, position: &Position) -> Result<(), HazardError>;
    /// Returns true if a row was removed.
    async fn delete_position(&self, entity_id: &str) -> Result<bool, HazardError>;
    /// Delete only if the stored row was last seen before `cutoff`, so a
    /// row refreshed by another instance survives.
    async fn delete_position_if_stale(
        &self,
        entity_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, HazardError>;
    async fn list_positions(&self) -> Result<Vec<PresenceRecord>, HazardError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 3] = [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete];
}

/// A change notification. Consumers treat it as a hint to refresh;
/// `entity_id: None` means "something changed, re-fetch everything".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub record: Option<PresenceRecord>,
}

impl ChangeEvent {
    pub fn resync(table: &str) -> Self {
        Self {
            table: table.to_string(),
            kind: ChangeKind::Update,
            entity_id: None,
            record: None,
        }
    }
}

pub type ChangeStream = BoxStream<'static, ChangeEvent>;

/// Realtime change feed.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, table: &str, kinds: &[ChangeKind]) -> Result<ChangeStream, HazardError>;
}

/// A remote hit together with how long the writer said it may live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub value: String,
    /// `None` when the tier holds the key without an expiry
    pub ttl_remaining: Option<Duration>,
}

/// Shared remote cache tier.
#[async_trait]
pub trait RemoteCacheTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, CacheError>;
    /// `ttl` keeps millisecond precision; tiers must not round it up.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn delete_keys(&self, keys: &[String]) -> Result<u64, CacheError>;
    async fn list_keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError>;
}

/// Pull query for hazard reports inside a viewport.
#[async_trait]
pub trait ReportSource: Send + Sync {
    async fn reports_near(&self, bbox: &BoundingBox) -> Result<Vec<IncidentReport>, HazardError>;
}
