//! Event dispatch table keyed by event kind.

use std::collections::HashMap;

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::AggregateError;

/// A state transition for one event kind.
pub type ApplyFn<A> = fn(&mut A, &<A as Aggregate>::Event);

/// Maps event kinds to the transition that folds them into state.
///
/// Transitions must be deterministic and free of side effects: the same
/// state and event always produce the same next state.
pub struct EventApplier<A: Aggregate> {
    transitions: HashMap<&'static str, ApplyFn<A>>,
}

impl<A: Aggregate> EventApplier<A> {
    pub fn new() -> Self {
        Self {
            transitions: HashMap::new(),
        }
    }

    /// Registers the transition for `kind`, replacing any earlier one.
    pub fn on(mut self, kind: &'static str, transition: ApplyFn<A>) -> Self {
        self.transitions.insert(kind, transition);
        self
    }

    pub fn handles(&self, kind: &str) -> bool {
        self.transitions.contains_key(kind)
    }

    /// Folds one event into `state`.
    ///
    /// `state` is not touched when the kind has no transition.
    pub fn apply(&self, state: &mut A, event: &A::Event) -> Result<(), AggregateError> {
        let kind = event.event_type();
        let transition =
            self.transitions
                .get(kind)
                .ok_or_else(|| AggregateError::UnhandledEventKind {
                    aggregate_type: A::aggregate_type(),
                    event_type: kind,
                })?;
        transition(state, event);
        Ok(())
    }

    /// Declared event kinds that have no transition.
    pub fn missing_kinds(&self) -> Vec<&'static str> {
        <A::Event as DomainEvent>::event_kinds()
            .iter()
            .copied()
            .filter(|kind| !self.handles(kind))
            .collect()
    }

    /// Registered kinds the event type never declares.
    pub fn undeclared_kinds(&self) -> Vec<&'static str> {
        let declared = <A::Event as DomainEvent>::event_kinds();
        let mut extra: Vec<_> = self
            .transitions
            .keys()
            .copied()
            .filter(|kind| !declared.contains(kind))
            .collect();
        extra.sort_unstable();
        extra
    }
}

impl<A: Aggregate> Default for EventApplier<A> {
    fn default() -> Self {
        Self::new()
    }
}
