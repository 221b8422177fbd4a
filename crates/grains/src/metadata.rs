//! Per-key watermark and the dedup check against it.

use chrono::{DateTime, Utc};
use common::LogicalTimestamp;
use serde::{Deserialize, Serialize};

use crate::message::StreamMessage;

/// Bookkeeping stored next to a grain's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrainMetadata {
    /// Logical time of the most recently applied message. Never decreases.
    pub last_occurred_at: LogicalTimestamp,

    /// Messages applied since the grain was first written.
    pub events_applied: u64,

    pub updated_at: DateTime<Utc>,
}

impl GrainMetadata {
    /// Metadata for a grain whose first message was applied at `at`.
    pub fn first(at: LogicalTimestamp) -> Self {
        Self {
            last_occurred_at: at,
            events_applied: 1,
            updated_at: Utc::now(),
        }
    }

    /// Moves the watermark to `at` after one more applied message.
    ///
    /// The watermark never moves backwards.
    pub fn advance(&self, at: LogicalTimestamp) -> Self {
        Self {
            last_occurred_at: self.last_occurred_at.max(at),
            events_applied: self.events_applied + 1,
            updated_at: Utc::now(),
        }
    }
}

/// Decides whether a message is already reflected in a grain.
#[derive(Debug, Clone, Copy, Default)]
pub struct DedupChecker;

impl DedupChecker {
    /// True when `message` is at or before the watermark.
    ///
    /// An equal timestamp counts as processed, so two distinct messages for
    /// one key that share a timestamp keep only the first delivered.
    pub fn is_message_processed(message: &StreamMessage, metadata: &GrainMetadata) -> bool {
        message.occurred_at <= metadata.last_occurred_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ts: i64) -> StreamMessage {
        StreamMessage::new("k", "Updated", ts, serde_json::Value::Null)
    }

    #[test]
    fn older_and_equal_timestamps_are_processed() {
        let metadata = GrainMetadata::first(LogicalTimestamp::new(5));

        assert!(DedupChecker::is_message_processed(&at(4), &metadata));
        assert!(DedupChecker::is_message_processed(&at(5), &metadata));
        assert!(!DedupChecker::is_message_processed(&at(6), &metadata));
    }

    #[test]
    fn advance_counts_and_never_rewinds() {
        let metadata = GrainMetadata::first(LogicalTimestamp::new(3));
        let next = metadata.advance(LogicalTimestamp::new(7));
        assert_eq!(next.last_occurred_at, LogicalTimestamp::new(7));
        assert_eq!(next.events_applied, 2);

        let rewound = next.advance(LogicalTimestamp::new(1));
        assert_eq!(rewound.last_occurred_at, LogicalTimestamp::new(7));
    }
}
