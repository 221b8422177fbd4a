use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{LogicalTimestamp, RoutingKey};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::metadata::GrainMetadata;
use crate::store::{GrainRecord, GrainStore, MetadataStore, ProjectionStore};

type GrainId = (String, RoutingKey);

/// In-memory grain store.
///
/// State and metadata for a key live in one record behind one lock, so a
/// commit is atomic. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct InMemoryGrainStore {
    grains: Arc<RwLock<HashMap<GrainId, GrainRecord>>>,
}

impl InMemoryGrainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of grains with any stored data for `projection`.
    pub async fn grain_count(&self, projection: &str) -> usize {
        self.grains
            .read()
            .await
            .keys()
            .filter(|(p, _)| p == projection)
            .count()
    }

    /// Keys of every grain stored for `projection`, sorted.
    pub async fn keys(&self, projection: &str) -> Vec<RoutingKey> {
        let mut keys: Vec<_> = self
            .grains
            .read()
            .await
            .keys()
            .filter(|(p, _)| p == projection)
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

fn grain_id(projection: &str, key: &RoutingKey) -> GrainId {
    (projection.to_string(), key.clone())
}

#[async_trait]
impl MetadataStore for InMemoryGrainStore {
    async fn get_metadata(
        &self,
        projection: &str,
        key: &RoutingKey,
    ) -> Result<Option<GrainMetadata>, StoreError> {
        Ok(self
            .grains
            .read()
            .await
            .get(&grain_id(projection, key))
            .and_then(|record| record.metadata.clone()))
    }

    async fn put_metadata(
        &self,
        projection: &str,
        key: &RoutingKey,
        metadata: &GrainMetadata,
    ) -> Result<(), StoreError> {
        self.grains
            .write()
            .await
            .entry(grain_id(projection, key))
            .or_default()
            .metadata = Some(metadata.clone());
        Ok(())
    }
}

#[async_trait]
impl ProjectionStore for InMemoryGrainStore {
    async fn get_state(
        &self,
        projection: &str,
        key: &RoutingKey,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self
            .grains
            .read()
            .await
            .get(&grain_id(projection, key))
            .and_then(|record| record.state.clone()))
    }

    async fn put_state(
        &self,
        projection: &str,
        key: &RoutingKey,
        state: &serde_json::Value,
    ) -> Result<(), StoreError> {
        self.grains
            .write()
            .await
            .entry(grain_id(projection, key))
            .or_default()
            .state = Some(state.clone());
        Ok(())
    }
}

#[async_trait]
impl GrainStore for InMemoryGrainStore {
    async fn load(&self, projection: &str, key: &RoutingKey) -> Result<GrainRecord, StoreError> {
        Ok(self
            .grains
            .read()
            .await
            .get(&grain_id(projection, key))
            .cloned()
            .unwrap_or_default())
    }

    async fn commit(
        &self,
        projection: &str,
        key: &RoutingKey,
        expected: Option<LogicalTimestamp>,
        state: &serde_json::Value,
        metadata: &GrainMetadata,
    ) -> Result<(), StoreError> {
        let id = grain_id(projection, key);
        let mut grains = self.grains.write().await;

        let actual = grains.get(&id).and_then(GrainRecord::watermark);
        if actual != expected {
            return Err(StoreError::Conflict {
                projection: projection.to_string(),
                routing_key: key.clone(),
                expected,
                actual,
            });
        }

        grains.insert(
            id,
            GrainRecord {
                state: Some(state.clone()),
                metadata: Some(metadata.clone()),
            },
        );
        Ok(())
    }
}
