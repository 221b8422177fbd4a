use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{AggregateId, LogicalTimestamp};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of events applied to an aggregate.
///
/// A fresh aggregate is at version 0; the n-th event moves it to version n.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Version of an aggregate with no events.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Version after the first event.
    pub fn first() -> Self {
        Self(1)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A persisted event together with the facts the log needs to order it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,

    /// Event kind, e.g. `"OrderCreated"`.
    pub event_type: String,

    pub aggregate_id: AggregateId,

    /// Aggregate kind, e.g. `"Order"`.
    pub aggregate_type: String,

    /// Aggregate version after this event.
    pub version: Version,

    /// Global position in the log, assigned on append. Zero until then.
    #[serde(default)]
    pub position: u64,

    /// Wall-clock time the event was recorded.
    pub timestamp: DateTime<Utc>,

    pub payload: serde_json::Value,

    pub metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelope {
    /// Wraps a serializable event for appending.
    pub fn for_event<E: Serialize>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        version: Version,
        event: &E,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id: EventId::new(),
            event_type: event_type.into(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            position: 0,
            timestamp: Utc::now(),
            payload: serde_json::to_value(event)?,
            metadata: HashMap::new(),
        })
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Deserializes the payload back into a typed event.
    pub fn decode<E: DeserializeOwned>(&self) -> Result<E, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// The logical occurrence time used downstream for dedup.
    ///
    /// The global position is strictly increasing across the whole log, so
    /// it orders events for any routing key, not only per aggregate.
    pub fn occurred_at(&self) -> LogicalTimestamp {
        LogicalTimestamp::from_position(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Renamed {
        name: String,
    }

    #[test]
    fn version_sequence() {
        assert_eq!(Version::initial().as_u64(), 0);
        assert_eq!(Version::initial().next(), Version::first());
        assert!(Version::new(1) < Version::new(2));
    }

    #[test]
    fn envelope_round_trips_payload() {
        let id = AggregateId::new();
        let event = Renamed {
            name: "widget".to_string(),
        };
        let envelope =
            EventEnvelope::for_event(id, "Thing", "Renamed", Version::first(), &event).unwrap();

        assert_eq!(envelope.position, 0);
        assert_eq!(envelope.decode::<Renamed>().unwrap(), event);
    }

    #[test]
    fn occurred_at_follows_position() {
        let mut envelope = EventEnvelope::for_event(
            AggregateId::new(),
            "Thing",
            "Renamed",
            Version::first(),
            &serde_json::json!({}),
        )
        .unwrap()
        .with_metadata("correlation_id", serde_json::json!("abc"));
        envelope.position = 42;

        assert_eq!(envelope.occurred_at(), LogicalTimestamp::new(42));
        assert_eq!(
            envelope.metadata.get("correlation_id"),
            Some(&serde_json::json!("abc"))
        );
    }
}
