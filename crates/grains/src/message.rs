//! The stream message a grain consumes.

use common::{LogicalTimestamp, RoutingKey};
use event_store::EventEnvelope;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// One delivery from the event stream.
///
/// Delivery is at-least-once: the same message may arrive more than once
/// and messages for a key may arrive out of order. `occurred_at` is the only
/// thing the pipeline compares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub routing_key: RoutingKey,

    /// Event kind, e.g. `"OrderCreated"`.
    pub event_kind: String,

    pub occurred_at: LogicalTimestamp,

    pub payload: serde_json::Value,
}

impl StreamMessage {
    pub fn new(
        routing_key: impl Into<RoutingKey>,
        event_kind: impl Into<String>,
        occurred_at: impl Into<LogicalTimestamp>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            routing_key: routing_key.into(),
            event_kind: event_kind.into(),
            occurred_at: occurred_at.into(),
            payload,
        }
    }

    /// Deserializes the payload into a typed event.
    pub fn decode<E: DeserializeOwned>(&self) -> Result<E, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Keyed by aggregate id, timed by global log position.
impl From<&EventEnvelope> for StreamMessage {
    fn from(envelope: &EventEnvelope) -> Self {
        Self {
            routing_key: RoutingKey::from(envelope.aggregate_id),
            event_kind: envelope.event_type.clone(),
            occurred_at: envelope.occurred_at(),
            payload: envelope.payload.clone(),
        }
    }
}
