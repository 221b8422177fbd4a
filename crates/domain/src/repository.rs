//! Loading and persisting aggregates through the event log.

use std::marker::PhantomData;
use std::sync::Arc;

use common::AggregateId;
use event_store::{
    AppendOptions, EventEnvelope, EventStore, EventStoreError, EventStoreExt, Snapshot, Version,
};
use serde::{Serialize, de::DeserializeOwned};

use crate::aggregate::{Aggregate, AggregateRoot, DomainEvent};
use crate::error::{AggregateError, DomainError};
use crate::registry::AggregateRegistry;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: AggregateRoot<A>,

    /// The events that were generated and persisted.
    pub events: Vec<A::Event>,

    /// The new version of the aggregate after the command.
    pub new_version: Version,
}

/// Rebuilds aggregates from the log and appends their uncommitted events.
///
/// The repository is responsible for:
/// 1. Loading an aggregate, from a snapshot plus tail when one exists
/// 2. Running a command against the loaded state
/// 3. Appending the resulting events with optimistic concurrency
/// 4. Taking a snapshot when the configured interval is crossed
pub struct AggregateRepository<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    registry: Arc<AggregateRegistry>,
    snapshot_every: u64,
    _phantom: PhantomData<fn() -> A>,
}

impl<S, A> AggregateRepository<S, A>
where
    S: EventStore,
    A: Aggregate + Serialize + DeserializeOwned,
{
    pub fn new(store: S, registry: Arc<AggregateRegistry>) -> Self {
        Self {
            store,
            registry,
            snapshot_every: 0,
            _phantom: PhantomData,
        }
    }

    /// Saves a snapshot every `interval` events. Zero disables snapshots.
    pub fn with_snapshot_every(mut self, interval: u64) -> Self {
        self.snapshot_every = interval;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate. An id with no events yields a zero-state instance.
    #[tracing::instrument(skip(self), fields(aggregate_type = A::aggregate_type()))]
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<AggregateRoot<A>, DomainError> {
        let (snapshot, tail) = self.store.load_aggregate(aggregate_id).await?;
        let tail = decode_events::<A>(&tail)?;

        let root = match snapshot {
            Some(snapshot) => {
                if snapshot.aggregate_id != aggregate_id {
                    return Err(AggregateError::IdMismatch {
                        expected: aggregate_id,
                        actual: snapshot.aggregate_id,
                    }
                    .into());
                }
                AggregateRoot::from_snapshot(&self.registry, &snapshot, tail)?
            }
            None => AggregateRoot::from_history(&self.registry, aggregate_id, tail)?,
        };

        Ok(root)
    }

    /// Loads an aggregate, returning `None` if it has no events.
    pub async fn load_existing(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Option<AggregateRoot<A>>, DomainError> {
        let root = self.load(aggregate_id).await?;
        if root.version() == Version::initial() {
            Ok(None)
        } else {
            Ok(Some(root))
        }
    }

    /// Appends the aggregate's uncommitted events and marks them committed.
    ///
    /// The append expects the log to still be at the aggregate's committed
    /// version; a concurrent writer turns into a `ConcurrencyConflict` and
    /// the uncommitted events stay in place.
    #[tracing::instrument(skip(self, root), fields(aggregate_id = %root.id()))]
    pub async fn save(&self, root: &mut AggregateRoot<A>) -> Result<Version, DomainError> {
        if root.uncommitted_events().is_empty() {
            return Ok(root.version());
        }

        let committed = root.committed_version();
        let envelopes = build_envelopes::<A>(root.id(), committed, root.uncommitted_events())?;
        let count = envelopes.len() as u64;

        let new_version = self
            .store
            .append(envelopes, AppendOptions::expect_version(committed))
            .await?;
        root.mark_events_as_committed();

        metrics::counter!(
            "aggregate_events_committed_total",
            "aggregate_type" => A::aggregate_type()
        )
        .increment(count);

        if self.crosses_snapshot_boundary(committed, new_version) {
            self.take_snapshot(root, new_version).await;
        }

        Ok(new_version)
    }

    /// Snapshot failures never fail the save: the events are already durable
    /// and a later load simply replays further back.
    async fn take_snapshot(&self, root: &AggregateRoot<A>, version: Version) {
        let snapshot = Snapshot::capture(root.id(), A::aggregate_type(), version, root.state());
        let saved: Result<(), EventStoreError> = match snapshot {
            Ok(snapshot) => self.store.save_snapshot(snapshot).await,
            Err(err) => Err(err.into()),
        };

        match saved {
            Ok(()) => tracing::debug!(version = %version, "snapshot saved"),
            Err(err) => {
                metrics::counter!(
                    "aggregate_snapshot_failures_total",
                    "aggregate_type" => A::aggregate_type()
                )
                .increment(1);
                tracing::warn!(version = %version, error = %err, "snapshot not saved");
            }
        }
    }

    /// Runs a command against the current state and persists its events.
    ///
    /// The command function receives the current aggregate state and returns
    /// either the events to apply, or a domain rejection.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut root = self.load(aggregate_id).await?;
        let events = command_fn(root.state())?;

        if events.is_empty() {
            let new_version = root.version();
            return Ok(CommandResult {
                aggregate: root,
                events,
                new_version,
            });
        }

        root.apply_changes(events.iter().cloned())?;
        let new_version = self.save(&mut root).await?;

        Ok(CommandResult {
            aggregate: root,
            events,
            new_version,
        })
    }

    /// Checks that the stored snapshot plus its tail reproduces a full replay.
    ///
    /// Succeeds trivially when there is no snapshot.
    #[tracing::instrument(skip(self), fields(aggregate_type = A::aggregate_type()))]
    pub async fn verify_snapshot(&self, aggregate_id: AggregateId) -> Result<(), DomainError> {
        let Some(snapshot) = self.store.load_snapshot(aggregate_id).await? else {
            return Ok(());
        };

        let history = decode_events::<A>(&self.store.events_for(aggregate_id).await?)?;
        let covered = usize::try_from(snapshot.version.as_u64())
            .unwrap_or(usize::MAX)
            .min(history.len());

        let from_snapshot = AggregateRoot::<A>::from_snapshot(
            &self.registry,
            &snapshot,
            history[covered..].iter().cloned(),
        )?;
        let full = AggregateRoot::<A>::from_history(&self.registry, aggregate_id, history)?;

        if from_snapshot.version() != full.version()
            || serde_json::to_value(from_snapshot.state())? != serde_json::to_value(full.state())?
        {
            tracing::warn!(%aggregate_id, version = %snapshot.version, "snapshot diverges");
            return Err(DomainError::SnapshotMismatch {
                aggregate_id,
                version: snapshot.version,
            });
        }

        Ok(())
    }

    fn crosses_snapshot_boundary(&self, from: Version, to: Version) -> bool {
        self.snapshot_every > 0
            && from.as_u64() / self.snapshot_every != to.as_u64() / self.snapshot_every
    }
}

fn decode_events<A: Aggregate>(envelopes: &[EventEnvelope]) -> Result<Vec<A::Event>, DomainError> {
    envelopes
        .iter()
        .map(|envelope| envelope.decode::<A::Event>().map_err(DomainError::from))
        .collect()
}

fn build_envelopes<A: Aggregate>(
    aggregate_id: AggregateId,
    committed: Version,
    events: &[A::Event],
) -> Result<Vec<EventEnvelope>, DomainError> {
    let mut version = committed;
    events
        .iter()
        .map(|event| {
            version = version.next();
            EventEnvelope::for_event(
                aggregate_id,
                A::aggregate_type(),
                event.event_type(),
                version,
                event,
            )
            .map_err(DomainError::from)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::EventApplier;
    use crate::registry::KindRegistration;
    use event_store::InMemoryEventStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum NoteEvent {
        Written { text: String },
        Appended { text: String },
    }

    impl DomainEvent for NoteEvent {
        fn event_type(&self) -> &'static str {
            match self {
                NoteEvent::Written { .. } => "Written",
                NoteEvent::Appended { .. } => "Appended",
            }
        }

        fn event_kinds() -> &'static [&'static str] {
            &["Written", "Appended"]
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    #[derive(Debug, thiserror::Error)]
    enum NoteError {
        #[error("note already written")]
        AlreadyWritten,
    }

    impl From<NoteError> for DomainError {
        fn from(_: NoteError) -> Self {
            DomainError::AggregateNotFound {
                aggregate_type: "Note",
                aggregate_id: AggregateId::from_uuid(uuid::Uuid::nil()),
            }
        }
    }

    impl Aggregate for Note {
        type Event = NoteEvent;
        type Error = NoteError;

        fn aggregate_type() -> &'static str {
            "Note"
        }
    }

    fn written(note: &mut Note, event: &NoteEvent) {
        if let NoteEvent::Written { text } = event {
            note.text = text.clone();
        }
    }

    fn appended(note: &mut Note, event: &NoteEvent) {
        if let NoteEvent::Appended { text } = event {
            note.text.push_str(text);
        }
    }

    fn registry() -> Arc<AggregateRegistry> {
        let mut registry = AggregateRegistry::new();
        registry
            .register(
                KindRegistration::new(
                    EventApplier::<Note>::new()
                        .on("Written", written)
                        .on("Appended", appended),
                )
                .with_factory(Note::default),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn append(text: &str) -> NoteEvent {
        NoteEvent::Appended {
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn execute_persists_and_reloads() {
        let repo = AggregateRepository::<_, Note>::new(InMemoryEventStore::new(), registry());
        let id = AggregateId::new();

        let result = repo
            .execute(id, |_| {
                Ok(vec![NoteEvent::Written {
                    text: "hello".to_string(),
                }])
            })
            .await
            .unwrap();
        assert_eq!(result.new_version, Version::first());
        assert!(result.aggregate.uncommitted_events().is_empty());

        repo.execute(id, |_| Ok(vec![append(" world")]))
            .await
            .unwrap();

        let loaded = repo.load(id).await.unwrap();
        assert_eq!(loaded.state().text, "hello world");
        assert_eq!(loaded.version(), Version::new(2));
    }

    #[tokio::test]
    async fn rejected_command_persists_nothing() {
        let store = InMemoryEventStore::new();
        let repo = AggregateRepository::<_, Note>::new(store.clone(), registry());

        let result = repo
            .execute(AggregateId::new(), |_| Err(NoteError::AlreadyWritten))
            .await;

        assert!(result.is_err());
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn empty_command_result_skips_append() {
        let store = InMemoryEventStore::new();
        let repo = AggregateRepository::<_, Note>::new(store.clone(), registry());

        let result = repo.execute(AggregateId::new(), |_| Ok(vec![])).await.unwrap();

        assert!(result.events.is_empty());
        assert_eq!(result.new_version, Version::initial());
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn load_existing_distinguishes_new_ids() {
        let repo = AggregateRepository::<_, Note>::new(InMemoryEventStore::new(), registry());
        let id = AggregateId::new();
        assert!(repo.load_existing(id).await.unwrap().is_none());

        repo.execute(id, |_| Ok(vec![append("x")])).await.unwrap();
        assert!(repo.load_existing(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_root_conflicts_and_keeps_uncommitted() {
        let repo = AggregateRepository::<_, Note>::new(InMemoryEventStore::new(), registry());
        let id = AggregateId::new();

        let mut first = repo.load(id).await.unwrap();
        let mut second = repo.load(id).await.unwrap();

        first.apply_change(append("a")).unwrap();
        repo.save(&mut first).await.unwrap();

        second.apply_change(append("b")).unwrap();
        let err = repo.save(&mut second).await.unwrap_err();

        assert!(matches!(err, DomainError::EventStore(_)));
        assert_eq!(second.uncommitted_events().len(), 1);
    }

    #[tokio::test]
    async fn snapshots_are_taken_and_used() {
        let store = InMemoryEventStore::new();
        let repo =
            AggregateRepository::<_, Note>::new(store.clone(), registry()).with_snapshot_every(3);
        let id = AggregateId::new();

        for text in ["a", "b", "c", "d"] {
            repo.execute(id, |_| Ok(vec![append(text)])).await.unwrap();
        }

        let snapshot = store.load_snapshot(id).await.unwrap().unwrap();
        assert_eq!(snapshot.version, Version::new(3));

        let loaded = repo.load(id).await.unwrap();
        assert_eq!(loaded.state().text, "abcd");
        assert_eq!(loaded.version(), Version::new(4));
        repo.verify_snapshot(id).await.unwrap();
    }

    /// Accepts events but refuses every snapshot.
    #[derive(Clone, Default)]
    struct NoSnapshots {
        inner: InMemoryEventStore,
    }

    #[async_trait::async_trait]
    impl EventStore for NoSnapshots {
        async fn append(
            &self,
            events: Vec<EventEnvelope>,
            options: AppendOptions,
        ) -> event_store::Result<Version> {
            self.inner.append(events, options).await
        }

        async fn events_for(
            &self,
            aggregate_id: AggregateId,
        ) -> event_store::Result<Vec<EventEnvelope>> {
            self.inner.events_for(aggregate_id).await
        }

        async fn events_from(
            &self,
            aggregate_id: AggregateId,
            from: Version,
        ) -> event_store::Result<Vec<EventEnvelope>> {
            self.inner.events_from(aggregate_id, from).await
        }

        async fn stream_after(&self, after: u64) -> event_store::Result<event_store::EventStream> {
            self.inner.stream_after(after).await
        }

        async fn current_version(
            &self,
            aggregate_id: AggregateId,
        ) -> event_store::Result<Option<Version>> {
            self.inner.current_version(aggregate_id).await
        }

        async fn save_snapshot(&self, _snapshot: Snapshot) -> event_store::Result<()> {
            Err(EventStoreError::InvalidAppend("snapshot table unavailable".into()))
        }

        async fn load_snapshot(
            &self,
            aggregate_id: AggregateId,
        ) -> event_store::Result<Option<Snapshot>> {
            self.inner.load_snapshot(aggregate_id).await
        }
    }

    #[tokio::test]
    async fn snapshot_failure_does_not_fail_committed_command() {
        let store = NoSnapshots::default();
        let repo =
            AggregateRepository::<_, Note>::new(store.clone(), registry()).with_snapshot_every(1);
        let id = AggregateId::new();

        let result = repo
            .execute(id, |_| Ok(vec![append("a"), append("b")]))
            .await
            .unwrap();
        assert_eq!(result.new_version, Version::new(2));
        assert!(result.aggregate.uncommitted_events().is_empty());

        repo.execute(id, |_| Ok(vec![append("c")])).await.unwrap();

        assert_eq!(store.inner.event_count().await, 3);
        assert!(store.load_snapshot(id).await.unwrap().is_none());
        assert_eq!(repo.load(id).await.unwrap().state().text, "abc");
    }

    #[tokio::test]
    async fn verify_snapshot_detects_divergence() {
        let store = InMemoryEventStore::new();
        let repo = AggregateRepository::<_, Note>::new(store.clone(), registry());
        let id = AggregateId::new();

        repo.execute(id, |_| Ok(vec![append("a"), append("b")]))
            .await
            .unwrap();
        store
            .save_snapshot(
                Snapshot::capture(
                    id,
                    "Note",
                    Version::new(2),
                    &Note {
                        text: "tampered".to_string(),
                    },
                )
                .unwrap(),
            )
            .await
            .unwrap();

        assert!(matches!(
            repo.verify_snapshot(id).await,
            Err(DomainError::SnapshotMismatch { .. })
        ));
    }
}
