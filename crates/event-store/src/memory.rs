use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::RwLock;

use crate::store::{AppendOptions, EventStore, EventStream, validate_batch};
use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Snapshot, Version};

#[derive(Default)]
struct Log {
    /// Events in position order.
    events: Vec<EventEnvelope>,
    versions: HashMap<AggregateId, Version>,
    snapshots: HashMap<AggregateId, Snapshot>,
}

/// In-memory event log.
///
/// Cloning shares the underlying log, so one clone can append while another
/// streams.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Log>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events in the log.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.events.len()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        mut events: Vec<EventEnvelope>,
        options: AppendOptions,
    ) -> Result<Version> {
        validate_batch(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let mut log = self.log.write().await;

        let current = log
            .versions
            .get(&aggregate_id)
            .copied()
            .unwrap_or_else(Version::initial);

        if let Some(expected) = options.expected_version
            && expected != current
        {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current,
            });
        }

        // Versions are unique per aggregate even without an expected version.
        if events[0].version != current.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: Version::new(events[0].version.as_u64().saturating_sub(1)),
                actual: current,
            });
        }

        let mut position = log.events.len() as u64;
        for event in &mut events {
            position += 1;
            event.position = position;
        }

        let last = events[events.len() - 1].version;
        log.versions.insert(aggregate_id, last);
        log.events.extend(events);

        Ok(last)
    }

    async fn events_for(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>> {
        self.events_from(aggregate_id, Version::initial()).await
    }

    async fn events_from(
        &self,
        aggregate_id: AggregateId,
        from: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        Ok(log
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id && e.version >= from)
            .cloned()
            .collect())
    }

    async fn stream_after(&self, after: u64) -> Result<EventStream> {
        let log = self.log.read().await;
        let events: Vec<_> = log
            .events
            .iter()
            .filter(|e| e.position > after)
            .cloned()
            .collect();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn current_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        Ok(self.log.read().await.versions.get(&aggregate_id).copied())
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        self.log
            .write()
            .await
            .snapshots
            .insert(snapshot.aggregate_id, snapshot);
        Ok(())
    }

    async fn load_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        Ok(self.log.read().await.snapshots.get(&aggregate_id).cloned())
    }
}
