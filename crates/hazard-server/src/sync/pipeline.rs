//! Write path for position samples.
//!
//! validate → local presence → durable store → cache invalidation.
//! Local state changes first so the entity sees its own move immediately;
//! the cache is invalidated whether or not the durable write succeeded.

use std::sync::Arc;

use hazard_core::Position;

use crate::cache::{keys, CacheLayer};
use crate::error::HazardError;
use crate::ports::{DurableStore, PositionFix};
use crate::state::presence::{PresenceStore, UpsertOutcome};

#[derive(Clone)]
pub struct PositionPipeline {
    presence: Arc<PresenceStore>,
    durable: Option<Arc<dyn DurableStore>>,
    cache: Arc<CacheLayer>,
}

impl PositionPipeline {
    pub fn new(
        presence: Arc<PresenceStore>,
        durable: Option<Arc<dyn DurableStore>>,
        cache: Arc<CacheLayer>,
    ) -> Self {
        Self {
            presence,
            durable,
            cache,
        }
    }

    pub fn presence(&self) -> &Arc<PresenceStore> {
        &self.presence
    }

    pub fn durable(&self) -> Option<&Arc<dyn DurableStore>> {
        self.durable.as_ref()
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    /// Publish a sample. A stale sample is accepted but changes nothing.
    pub async fn publish(&self, position: Position) -> Result<UpsertOutcome, HazardError> {
        position.validate()?;

        let outcome = self.presence.upsert(position.clone());
        if !outcome.applied() {
            tracing::debug!(
                "Ignoring out-of-order sample for {} captured at {}",
                position.entity_id,
                position.captured_at
            );
            return Ok(outcome);
        }

        let durable_result = match &self.durable {
            Some(durable) => durable.upsert_position(&position).await,
            None => Ok(()),
        };

        self.cache.delete_by_pattern(keys::PRESENCE_PATTERN).await;

        if let Err(err) = &durable_result {
            tracing::warn!(
                "Durable write for {} failed, kept locally: {}",
                position.entity_id,
                err
            );
        }
        durable_result.map(|_| outcome)
    }

    pub async fn publish_fix(
        &self,
        entity_id: &str,
        fix: PositionFix,
    ) -> Result<UpsertOutcome, HazardError> {
        let mut position = Position::new(entity_id, fix.latitude, fix.longitude, fix.timestamp)?;
        if let Some(accuracy) = fix.accuracy_m {
            position = position.with_accuracy(accuracy)?;
        }
        self.publish(position).await
    }

    /// Remove an entity everywhere. Returns true if anything was removed.
    pub async fn withdraw(&self, entity_id: &str) -> Result<bool, HazardError> {
        let local = self.presence.remove(entity_id).is_some();

        let durable_result = match &self.durable {
            Some(durable) => durable.delete_position(entity_id).await,
            None => Ok(false),
        };

        self.cache.delete_by_pattern(keys::PRESENCE_PATTERN).await;
        durable_result.map(|durable| local || durable)
    }
}
