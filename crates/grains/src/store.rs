//! Persistence boundaries for grain state and metadata.

use async_trait::async_trait;
use common::{LogicalTimestamp, RoutingKey};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::metadata::GrainMetadata;

/// Everything persisted for one grain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrainRecord {
    pub state: Option<serde_json::Value>,
    pub metadata: Option<GrainMetadata>,
}

impl GrainRecord {
    pub fn watermark(&self) -> Option<LogicalTimestamp> {
        self.metadata.as_ref().map(|m| m.last_occurred_at)
    }
}

/// Reads and writes the per-key watermark.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_metadata(
        &self,
        projection: &str,
        key: &RoutingKey,
    ) -> Result<Option<GrainMetadata>, StoreError>;

    async fn put_metadata(
        &self,
        projection: &str,
        key: &RoutingKey,
        metadata: &GrainMetadata,
    ) -> Result<(), StoreError>;
}

/// Reads and writes the per-key projection state.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    async fn get_state(
        &self,
        projection: &str,
        key: &RoutingKey,
    ) -> Result<Option<serde_json::Value>, StoreError>;

    async fn put_state(
        &self,
        projection: &str,
        key: &RoutingKey,
        state: &serde_json::Value,
    ) -> Result<(), StoreError>;
}

/// A store that can write state and metadata as one unit.
///
/// The router only ever writes through [`commit`](GrainStore::commit).
#[async_trait]
pub trait GrainStore: MetadataStore + ProjectionStore {
    /// Loads state and metadata for a key.
    async fn load(&self, projection: &str, key: &RoutingKey) -> Result<GrainRecord, StoreError> {
        let metadata = self.get_metadata(projection, key).await?;
        let state = self.get_state(projection, key).await?;
        Ok(GrainRecord { state, metadata })
    }

    /// Writes state and metadata together, or neither.
    ///
    /// `expected` is the watermark the caller loaded. If the stored
    /// watermark differs the write is refused with
    /// [`StoreError::Conflict`] and nothing changes.
    async fn commit(
        &self,
        projection: &str,
        key: &RoutingKey,
        expected: Option<LogicalTimestamp>,
        state: &serde_json::Value,
        metadata: &GrainMetadata,
    ) -> Result<(), StoreError>;
}
