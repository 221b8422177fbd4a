//! Core aggregate traits and the event-sourced aggregate root.

use std::sync::Arc;

use common::AggregateId;
use event_store::{Snapshot, Version};
use serde::{Serialize, de::DeserializeOwned};

use crate::applier::EventApplier;
use crate::error::AggregateError;
use crate::registry::AggregateRegistry;

/// Trait for domain events.
///
/// Domain events are immutable facts, named in past tense. Each value
/// reports its kind, and the type declares the full catalogue of kinds so
/// dispatch coverage can be checked once at start-up.
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The kind of this event, e.g. `"OrderCreated"`.
    fn event_type(&self) -> &'static str;

    /// Every kind a value of this type can report from [`event_type`](Self::event_type).
    fn event_kinds() -> &'static [&'static str];
}

/// An event-sourced entity kind.
///
/// State transitions are not defined here: they live in the kind's
/// [`EventApplier`], registered with an [`AggregateRegistry`] together with
/// the zero-value factory used for replay.
pub trait Aggregate: Clone + Send + Sync + Sized + 'static {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Rejections raised by command methods.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;
}

/// An aggregate instance with identity, version and pending changes.
///
/// Owned by one command for its duration; it is never shared between
/// concurrent callers.
#[derive(Clone)]
pub struct AggregateRoot<A: Aggregate> {
    id: AggregateId,
    version: Version,
    state: A,
    uncommitted: Vec<A::Event>,
    applier: Arc<EventApplier<A>>,
}

impl<A: Aggregate> std::fmt::Debug for AggregateRoot<A>
where
    A: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateRoot")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("state", &self.state)
            .field("uncommitted", &self.uncommitted.len())
            .finish()
    }
}

impl<A: Aggregate> AggregateRoot<A> {
    /// Wraps an existing state at a known version.
    pub fn new(id: AggregateId, version: Version, state: A, applier: Arc<EventApplier<A>>) -> Self {
        Self {
            id,
            version,
            state,
            uncommitted: Vec::new(),
            applier,
        }
    }

    /// A zero-state instance built by the kind's registered factory.
    ///
    /// No domain validation runs on this path.
    pub fn blank(registry: &AggregateRegistry, id: AggregateId) -> Result<Self, AggregateError> {
        let state = registry.zero::<A>()?;
        let applier = registry.applier::<A>()?;
        Ok(Self::new(id, Version::initial(), state, applier))
    }

    /// Rebuilds an aggregate by replaying its history onto a zero state.
    ///
    /// The result has `version == history.len()` and no uncommitted events.
    pub fn from_history(
        registry: &AggregateRegistry,
        id: AggregateId,
        history: impl IntoIterator<Item = A::Event>,
    ) -> Result<Self, AggregateError> {
        let mut root = Self::blank(registry, id)?;
        root.replay_history(history)?;
        Ok(root)
    }

    /// Restores from a snapshot and replays the events recorded after it.
    pub fn from_snapshot(
        registry: &AggregateRegistry,
        snapshot: &Snapshot,
        tail: impl IntoIterator<Item = A::Event>,
    ) -> Result<Self, AggregateError>
    where
        A: DeserializeOwned,
    {
        if snapshot.aggregate_type != A::aggregate_type() {
            return Err(AggregateError::KindMismatch {
                expected: A::aggregate_type(),
                actual: snapshot.aggregate_type.clone(),
            });
        }

        let state: A = snapshot.restore()?;
        let applier = registry.applier::<A>()?;
        let mut root = Self::new(snapshot.aggregate_id, snapshot.version, state, applier);
        root.replay_history(tail)?;
        Ok(root)
    }

    /// Applies historical events in the given order without recording them
    /// as changes.
    pub fn replay_history(
        &mut self,
        history: impl IntoIterator<Item = A::Event>,
    ) -> Result<(), AggregateError> {
        for event in history {
            self.applier.apply(&mut self.state, &event)?;
            self.version = self.version.next();
        }
        Ok(())
    }

    /// Applies a new event and records it as uncommitted.
    ///
    /// An event kind without an applier leaves the aggregate untouched and
    /// returns [`AggregateError::UnhandledEventKind`].
    pub fn apply_change(&mut self, event: A::Event) -> Result<(), AggregateError> {
        self.applier.apply(&mut self.state, &event)?;
        self.version = self.version.next();
        self.uncommitted.push(event);
        Ok(())
    }

    /// Applies each event in order, stopping at the first failure.
    pub fn apply_changes(
        &mut self,
        events: impl IntoIterator<Item = A::Event>,
    ) -> Result<(), AggregateError> {
        for event in events {
            self.apply_change(event)?;
        }
        Ok(())
    }

    /// Forgets the uncommitted events once the caller has persisted them.
    pub fn mark_events_as_committed(&mut self) {
        self.uncommitted.clear();
    }

    /// Drains the uncommitted events.
    pub fn take_uncommitted(&mut self) -> Vec<A::Event> {
        std::mem::take(&mut self.uncommitted)
    }

    pub fn uncommitted_events(&self) -> &[A::Event] {
        &self.uncommitted
    }

    pub fn id(&self) -> AggregateId {
        self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Version as persisted, i.e. before the uncommitted events.
    pub fn committed_version(&self) -> Version {
        Version::new(self.version.as_u64() - self.uncommitted.len() as u64)
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    pub fn into_state(self) -> A {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::KindRegistration;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum CounterEvent {
        Incremented { by: i64 },
        Reset,
        Audited,
    }

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            match self {
                CounterEvent::Incremented { .. } => "Incremented",
                CounterEvent::Reset => "Reset",
                CounterEvent::Audited => "Audited",
            }
        }

        fn event_kinds() -> &'static [&'static str] {
            &["Incremented", "Reset", "Audited"]
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: i64,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("counter error")]
    struct CounterError;

    impl Aggregate for Counter {
        type Event = CounterEvent;
        type Error = CounterError;

        fn aggregate_type() -> &'static str {
            "Counter"
        }
    }

    fn increment(counter: &mut Counter, event: &CounterEvent) {
        if let CounterEvent::Incremented { by } = event {
            counter.value += by;
        }
    }

    fn reset(counter: &mut Counter, _: &CounterEvent) {
        counter.value = 0;
    }

    /// Deliberately leaves "Audited" without an applier.
    fn registry() -> AggregateRegistry {
        let applier = EventApplier::<Counter>::new()
            .on("Incremented", increment)
            .on("Reset", reset);
        let mut registry = AggregateRegistry::new();
        registry
            .register(KindRegistration::<Counter>::new(applier).with_factory(|| Counter { value: 0 }))
            .unwrap();
        registry
    }

    fn history() -> Vec<CounterEvent> {
        vec![
            CounterEvent::Incremented { by: 2 },
            CounterEvent::Incremented { by: 3 },
            CounterEvent::Reset,
            CounterEvent::Incremented { by: 7 },
        ]
    }

    #[test]
    fn from_history_sets_version_to_history_length() {
        let root = AggregateRoot::<Counter>::from_history(&registry(), AggregateId::new(), history())
            .unwrap();

        assert_eq!(root.version(), Version::new(4));
        assert_eq!(root.state().value, 7);
        assert!(root.uncommitted_events().is_empty());
    }

    #[test]
    fn replay_matches_sequential_apply_change() {
        let registry = registry();
        let id = AggregateId::new();
        let replayed = AggregateRoot::<Counter>::from_history(&registry, id, history()).unwrap();

        let mut applied = AggregateRoot::<Counter>::blank(&registry, id).unwrap();
        applied.apply_changes(history()).unwrap();

        assert_eq!(replayed.state(), applied.state());
        assert_eq!(replayed.version(), applied.version());
    }

    #[test]
    fn apply_change_records_uncommitted_and_bumps_version() {
        let mut root = AggregateRoot::<Counter>::blank(&registry(), AggregateId::new()).unwrap();
        root.apply_change(CounterEvent::Incremented { by: 1 }).unwrap();
        root.apply_change(CounterEvent::Incremented { by: 1 }).unwrap();

        assert_eq!(root.version(), Version::new(2));
        assert_eq!(root.committed_version(), Version::initial());
        assert_eq!(root.uncommitted_events().len(), 2);
    }

    #[test]
    fn mark_committed_twice_is_a_no_op() {
        let mut root = AggregateRoot::<Counter>::blank(&registry(), AggregateId::new()).unwrap();
        root.apply_change(CounterEvent::Incremented { by: 1 }).unwrap();
        assert!(!root.uncommitted_events().is_empty());

        root.mark_events_as_committed();
        assert!(root.uncommitted_events().is_empty());
        root.mark_events_as_committed();
        assert!(root.uncommitted_events().is_empty());
        assert_eq!(root.version(), Version::first());
        assert_eq!(root.committed_version(), Version::first());
    }

    #[test]
    fn unhandled_kind_surfaces_and_leaves_state_untouched() {
        let mut root = AggregateRoot::<Counter>::blank(&registry(), AggregateId::new()).unwrap();
        root.apply_change(CounterEvent::Incremented { by: 4 }).unwrap();

        let err = root.apply_change(CounterEvent::Audited).unwrap_err();

        assert!(matches!(
            err,
            AggregateError::UnhandledEventKind {
                aggregate_type: "Counter",
                event_type: "Audited"
            }
        ));
        assert_eq!(root.state().value, 4);
        assert_eq!(root.version(), Version::first());
        assert_eq!(root.uncommitted_events().len(), 1);
    }

    #[test]
    fn replay_does_not_reorder() {
        let registry = registry();
        let id = AggregateId::new();
        let events = vec![CounterEvent::Incremented { by: 5 }, CounterEvent::Reset];
        let root = AggregateRoot::<Counter>::from_history(&registry, id, events).unwrap();
        assert_eq!(root.state().value, 0);
    }

    #[test]
    fn from_snapshot_continues_version_count() {
        let registry = registry();
        let id = AggregateId::new();
        let snapshot =
            Snapshot::capture(id, "Counter", Version::new(10), &Counter { value: 40 }).unwrap();

        let root = AggregateRoot::<Counter>::from_snapshot(
            &registry,
            &snapshot,
            vec![CounterEvent::Incremented { by: 2 }],
        )
        .unwrap();

        assert_eq!(root.id(), id);
        assert_eq!(root.version(), Version::new(11));
        assert_eq!(root.state().value, 42);
    }

    #[test]
    fn from_snapshot_rejects_other_kinds() {
        let snapshot = Snapshot::capture(
            AggregateId::new(),
            "Order",
            Version::new(3),
            &Counter { value: 1 },
        )
        .unwrap();

        let err = AggregateRoot::<Counter>::from_snapshot(&registry(), &snapshot, vec![])
            .unwrap_err();

        assert!(matches!(
            err,
            AggregateError::KindMismatch {
                expected: "Counter",
                ref actual,
            } if actual == "Order"
        ));
    }

    #[test]
    fn take_uncommitted_drains_buffer() {
        let mut root = AggregateRoot::<Counter>::blank(&registry(), AggregateId::new()).unwrap();
        root.apply_change(CounterEvent::Reset).unwrap();

        let taken = root.take_uncommitted();
        assert_eq!(taken, vec![CounterEvent::Reset]);
        assert!(root.uncommitted_events().is_empty());
    }
}
