//! Domain error types.

use common::AggregateId;
use event_store::{EventStoreError, Version};
use thiserror::Error;

use crate::order::OrderError;

/// Start-up configuration defects in the aggregate registry.
///
/// None of these are recoverable by retrying; they mean the process was
/// built or wired incorrectly.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The kind has no zero-value factory, so replay cannot build it.
    #[error("Aggregate kind {aggregate_type} has no zero-value factory")]
    FactoryConstructionFailure { aggregate_type: &'static str },

    /// Some declared event kinds have no transition.
    #[error("Aggregate kind {aggregate_type} does not handle event kinds {missing:?}")]
    IncompleteDispatch {
        aggregate_type: &'static str,
        missing: Vec<&'static str>,
    },

    /// Transitions were registered for kinds the event type never declares.
    #[error("Aggregate kind {aggregate_type} registers undeclared event kinds {kinds:?}")]
    UndeclaredEventKinds {
        aggregate_type: &'static str,
        kinds: Vec<&'static str>,
    },

    #[error("Aggregate kind {0} is registered twice")]
    DuplicateKind(&'static str),
}

/// Errors raised by the aggregate engine itself.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// No transition is registered for the event's kind. This is a
    /// version-skew or wiring defect and retrying does not help.
    #[error("Aggregate {aggregate_type} has no applier for event kind {event_type}")]
    UnhandledEventKind {
        aggregate_type: &'static str,
        event_type: &'static str,
    },

    #[error("Aggregate kind {0} is not registered")]
    KindNotRegistered(&'static str),

    /// A stored snapshot belongs to a different aggregate than requested.
    #[error("Snapshot for {actual} returned when loading {expected}")]
    IdMismatch {
        expected: AggregateId,
        actual: AggregateId,
    },

    /// A snapshot recorded for one aggregate kind was handed to another.
    #[error("Snapshot of kind {actual} cannot restore a {expected}")]
    KindMismatch {
        expected: &'static str,
        actual: String,
    },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Aggregate error: {0}")]
    Aggregate(#[from] AggregateError),

    /// A command was rejected by the order aggregate.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
    },

    /// Snapshot plus tail replay disagrees with a full replay of the log.
    #[error("Snapshot of {aggregate_id} at version {version} diverges from full replay")]
    SnapshotMismatch {
        aggregate_id: AggregateId,
        version: Version,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
