//! Grain pipeline error types.

use common::{LogicalTimestamp, RoutingKey};
use event_store::EventStoreError;
use thiserror::Error;

/// Failures raised by a [`StatefulGrainHandler`](crate::StatefulGrainHandler).
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler subscribes to the message but has no update for its kind.
    #[error("No state update for event kind {event_kind}")]
    UnhandledEventKind { event_kind: String },

    /// The update rejected a structurally present event.
    #[error("Event rejected: {0}")]
    EventApplication(String),

    /// The payload could not be decoded into the event the handler expects.
    #[error("Malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Failures of the per-key state and metadata stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Metadata store error: {0}")]
    MetadataStore(String),

    #[error("Projection store error: {0}")]
    ProjectionStore(String),

    /// The watermark moved between load and commit.
    #[error(
        "Watermark for {projection}/{routing_key} changed: expected {expected:?}, found {actual:?}"
    )]
    Conflict {
        projection: String,
        routing_key: RoutingKey,
        expected: Option<LogicalTimestamp>,
        actual: Option<LogicalTimestamp>,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by routing a message to its grain.
///
/// A stale message is never an error; it is reported as
/// [`Disposition::Stale`](crate::Disposition::Stale).
#[derive(Debug, Error)]
pub enum GrainError {
    #[error("Projection {projection} has no state update for event kind {event_kind}")]
    UnhandledEventKind {
        projection: &'static str,
        event_kind: String,
    },

    #[error("Projection {projection} rejected event: {reason}")]
    EventApplication {
        projection: &'static str,
        reason: String,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Processing cancelled before commit")]
    Cancelled,

    #[error("Router is shut down")]
    RouterClosed,
}

impl GrainError {
    pub(crate) fn from_handler(projection: &'static str, err: HandlerError) -> Self {
        match err {
            HandlerError::UnhandledEventKind { event_kind } => GrainError::UnhandledEventKind {
                projection,
                event_kind,
            },
            HandlerError::EventApplication(reason) => GrainError::EventApplication {
                projection,
                reason,
            },
            HandlerError::Payload(err) => GrainError::EventApplication {
                projection,
                reason: err.to_string(),
            },
        }
    }

    /// Infrastructure failures that are safe to retry.
    ///
    /// Redelivery goes through the same dedup check, so a retry never
    /// double-applies. Defects and shutdown are not retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GrainError::Store(_) | GrainError::EventStore(_))
    }

    /// Stable label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GrainError::UnhandledEventKind { .. } => "unhandled_event_kind",
            GrainError::EventApplication { .. } => "event_application",
            GrainError::Store(_) => "store",
            GrainError::EventStore(_) => "event_store",
            GrainError::Serialization(_) => "serialization",
            GrainError::Cancelled => "cancelled",
            GrainError::RouterClosed => "router_closed",
        }
    }
}

/// Result type for grain operations.
pub type Result<T> = std::result::Result<T, GrainError>;
