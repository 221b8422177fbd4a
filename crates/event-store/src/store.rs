use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Snapshot, Version};

/// Options for appending events to the store.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Version the aggregate must be at for the append to succeed.
    /// `None` skips the check.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Expects the aggregate to have no events yet.
    pub fn expect_new() -> Self {
        Self::expect_version(Version::initial())
    }
}

/// A stream of events in log order.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Ordered, append-only event log.
///
/// Appends are atomic per batch: either every event lands, in order, or none
/// does. Each appended event receives a global position strictly greater
/// than every position handed out before it.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch for one aggregate and returns the aggregate's new version.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// All events for an aggregate, oldest first.
    async fn events_for(&self, aggregate_id: AggregateId) -> Result<Vec<EventEnvelope>>;

    /// Events for an aggregate with `version >= from`, oldest first.
    async fn events_from(
        &self,
        aggregate_id: AggregateId,
        from: Version,
    ) -> Result<Vec<EventEnvelope>>;

    /// Streams every event with `position > after`, in position order.
    async fn stream_after(&self, after: u64) -> Result<EventStream>;

    /// Current version of an aggregate, `None` if it has no events.
    async fn current_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;

    /// Stores a snapshot, replacing any earlier one for the aggregate.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()>;

    async fn load_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>>;
}

/// Convenience methods available on every [`EventStore`].
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Streams the whole log from the beginning.
    async fn stream_all(&self) -> Result<EventStream> {
        self.stream_after(0).await
    }

    /// Loads the latest snapshot (if any) and the events recorded after it.
    async fn load_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<(Option<Snapshot>, Vec<EventEnvelope>)> {
        match self.load_snapshot(aggregate_id).await? {
            Some(snapshot) => {
                let tail = self
                    .events_from(aggregate_id, snapshot.version.next())
                    .await?;
                Ok((Some(snapshot), tail))
            }
            None => Ok((None, self.events_for(aggregate_id).await?)),
        }
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Checks that a batch targets one aggregate with consecutive versions.
pub(crate) fn validate_batch(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty batch".to_string(),
        ));
    };

    let mut expected = first.version;
    for event in &events[1..] {
        if event.aggregate_id != first.aggregate_id || event.aggregate_type != first.aggregate_type
        {
            return Err(EventStoreError::InvalidAppend(
                "all events in a batch must belong to the same aggregate".to_string(),
            ));
        }
        expected = expected.next();
        if event.version != expected {
            return Err(EventStoreError::InvalidAppend(format!(
                "versions must be consecutive: expected {expected}, got {}",
                event.version
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(id: AggregateId, version: u64) -> EventEnvelope {
        EventEnvelope::for_event(
            id,
            "Thing",
            "Touched",
            Version::new(version),
            &serde_json::json!({}),
        )
        .unwrap()
    }

    #[test]
    fn rejects_empty_batch() {
        assert!(matches!(
            validate_batch(&[]),
            Err(EventStoreError::InvalidAppend(_))
        ));
    }

    #[test]
    fn rejects_gaps_in_versions() {
        let id = AggregateId::new();
        let batch = vec![envelope(id, 1), envelope(id, 3)];
        assert!(validate_batch(&batch).is_err());
    }

    #[test]
    fn rejects_mixed_aggregates() {
        let batch = vec![envelope(AggregateId::new(), 1), envelope(AggregateId::new(), 2)];
        assert!(validate_batch(&batch).is_err());
    }

    #[test]
    fn accepts_consecutive_batch() {
        let id = AggregateId::new();
        let batch = vec![envelope(id, 4), envelope(id, 5), envelope(id, 6)];
        assert!(validate_batch(&batch).is_ok());
    }
}
