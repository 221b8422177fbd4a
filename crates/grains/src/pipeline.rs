//! The per-message dedup / reset / apply state machine.
//!
//! ```text
//! no metadata for key                 => New      (empty state, then apply)
//! occurred_at <= last_occurred_at     => Stale    (drop, nothing written)
//! kind is in the reset policy         => Rebuild  (empty state, then apply)
//! otherwise                           => Apply    (update current state)
//! ```
//!
//! Everything here is pure. The router owns loading and committing.

use common::LogicalTimestamp;

use crate::error::GrainError;
use crate::handler::StatefulGrainHandler;
use crate::message::StreamMessage;
use crate::metadata::{DedupChecker, GrainMetadata};
use crate::reset::StateResetPolicy;
use crate::store::GrainRecord;

/// How a message was treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    New,
    Stale,
    Rebuild,
    Apply,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::New => "new",
            Disposition::Stale => "stale",
            Disposition::Rebuild => "rebuild",
            Disposition::Apply => "apply",
        }
    }

    /// Whether the message changed state and metadata.
    pub fn is_applied(&self) -> bool {
        !matches!(self, Disposition::Stale)
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies `message` against the grain's current metadata.
///
/// The stale check runs before the reset check: a reset message at or
/// before the watermark is dropped like any other duplicate.
pub fn decide(
    message: &StreamMessage,
    metadata: Option<&GrainMetadata>,
    policy: &StateResetPolicy,
) -> Disposition {
    match metadata {
        None => Disposition::New,
        Some(metadata) if DedupChecker::is_message_processed(message, metadata) => {
            Disposition::Stale
        }
        Some(_) if policy.should_reset(message) => Disposition::Rebuild,
        Some(_) => Disposition::Apply,
    }
}

/// The result of running one message through the state machine.
#[derive(Debug)]
pub enum Evaluation<S> {
    /// Nothing to write. Carries the unchanged watermark.
    Stale { watermark: LogicalTimestamp },

    /// State and metadata to commit together.
    Commit {
        disposition: Disposition,
        state: S,
        metadata: GrainMetadata,
    },
}

/// Runs `decide` and, unless stale, computes the next state and metadata.
///
/// A handler failure leaves nothing to commit, so the watermark does not
/// move and the message is evaluated afresh on redelivery.
pub fn evaluate<H: StatefulGrainHandler>(
    handler: &H,
    message: &StreamMessage,
    record: GrainRecord,
    policy: &StateResetPolicy,
) -> Result<Evaluation<H::State>, GrainError> {
    let disposition = decide(message, record.metadata.as_ref(), policy);

    let start = match disposition {
        Disposition::Stale => {
            let watermark = record
                .metadata
                .map(|metadata| metadata.last_occurred_at)
                .unwrap_or_default();
            return Ok(Evaluation::Stale { watermark });
        }
        Disposition::New | Disposition::Rebuild => H::State::default(),
        Disposition::Apply => match record.state {
            Some(state) => serde_json::from_value(state)?,
            None => H::State::default(),
        },
    };

    let state = handler
        .handle(message, start)
        .map_err(|err| GrainError::from_handler(handler.projection(), err))?;

    let metadata = match &record.metadata {
        Some(metadata) => metadata.advance(message.occurred_at),
        None => GrainMetadata::first(message.occurred_at),
    };

    Ok(Evaluation::Commit {
        disposition,
        state,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use serde_json::json;

    /// Appends each message kind to a list; "Broken" is rejected.
    struct Journal;

    impl StatefulGrainHandler for Journal {
        type State = Vec<String>;

        fn projection(&self) -> &'static str {
            "journal"
        }

        fn handle(
            &self,
            message: &StreamMessage,
            mut state: Vec<String>,
        ) -> Result<Vec<String>, HandlerError> {
            if message.event_kind == "Broken" {
                return Err(HandlerError::EventApplication("broken".into()));
            }
            state.push(message.event_kind.clone());
            Ok(state)
        }
    }

    fn message(kind: &str, ts: i64) -> StreamMessage {
        StreamMessage::new("K", kind, ts, json!({}))
    }

    fn record(state: &[&str], watermark: i64) -> GrainRecord {
        GrainRecord {
            state: Some(json!(state)),
            metadata: Some(GrainMetadata::first(LogicalTimestamp::new(watermark))),
        }
    }

    fn policy() -> StateResetPolicy {
        StateResetPolicy::new(["Rebuilt"])
    }

    #[test]
    fn decide_covers_every_branch() {
        let metadata = GrainMetadata::first(LogicalTimestamp::new(2));

        assert_eq!(
            decide(&message("Created", 1), None, &policy()),
            Disposition::New
        );
        assert_eq!(
            decide(&message("Updated", 2), Some(&metadata), &policy()),
            Disposition::Stale
        );
        assert_eq!(
            decide(&message("Rebuilt", 3), Some(&metadata), &policy()),
            Disposition::Rebuild
        );
        assert_eq!(
            decide(&message("Updated", 3), Some(&metadata), &policy()),
            Disposition::Apply
        );
    }

    #[test]
    fn stale_reset_is_still_stale() {
        let metadata = GrainMetadata::first(LogicalTimestamp::new(5));
        assert_eq!(
            decide(&message("Rebuilt", 5), Some(&metadata), &policy()),
            Disposition::Stale
        );
    }

    #[test]
    fn reset_kind_on_new_key_is_new() {
        assert_eq!(
            decide(&message("Rebuilt", 1), None, &policy()),
            Disposition::New
        );
    }

    #[test]
    fn apply_builds_on_stored_state() {
        let evaluation = evaluate(
            &Journal,
            &message("Updated", 4),
            record(&["Created"], 1),
            &policy(),
        )
        .unwrap();

        match evaluation {
            Evaluation::Commit {
                disposition,
                state,
                metadata,
            } => {
                assert_eq!(disposition, Disposition::Apply);
                assert_eq!(state, vec!["Created", "Updated"]);
                assert_eq!(metadata.last_occurred_at, LogicalTimestamp::new(4));
                assert_eq!(metadata.events_applied, 2);
            }
            other => panic!("expected commit, got {other:?}"),
        }
    }

    #[test]
    fn rebuild_discards_prior_state() {
        let evaluation = evaluate(
            &Journal,
            &message("Rebuilt", 9),
            record(&["Created", "Updated", "Updated"], 3),
            &policy(),
        )
        .unwrap();

        match evaluation {
            Evaluation::Commit {
                disposition, state, ..
            } => {
                assert_eq!(disposition, Disposition::Rebuild);
                assert_eq!(state, vec!["Rebuilt"]);
            }
            other => panic!("expected commit, got {other:?}"),
        }
    }

    #[test]
    fn new_key_ignores_orphaned_state() {
        let orphan = GrainRecord {
            state: Some(json!(["Leftover"])),
            metadata: None,
        };

        match evaluate(&Journal, &message("Created", 1), orphan, &policy()).unwrap() {
            Evaluation::Commit { state, .. } => assert_eq!(state, vec!["Created"]),
            other => panic!("expected commit, got {other:?}"),
        }
    }

    #[test]
    fn stale_reports_current_watermark() {
        match evaluate(&Journal, &message("Updated", 2), record(&[], 7), &policy()).unwrap() {
            Evaluation::Stale { watermark } => assert_eq!(watermark, LogicalTimestamp::new(7)),
            other => panic!("expected stale, got {other:?}"),
        }
    }

    #[test]
    fn handler_failure_is_an_error() {
        let err = evaluate(&Journal, &message("Broken", 5), record(&[], 1), &policy())
            .unwrap_err();
        assert!(matches!(
            err,
            GrainError::EventApplication {
                projection: "journal",
                ..
            }
        ));
    }
}
