//! Event kinds that rebuild a grain from scratch.

use std::collections::BTreeSet;

use crate::message::StreamMessage;

/// The closed set of event kinds that discard a grain's state before
/// applying themselves.
///
/// Built once per projection at start-up from
/// [`StatefulGrainHandler::reset_kinds`](crate::StatefulGrainHandler::reset_kinds).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateResetPolicy {
    kinds: BTreeSet<String>,
}

impl StateResetPolicy {
    pub fn new<I, K>(kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            kinds: kinds.into_iter().map(Into::into).collect(),
        }
    }

    /// A policy that never resets.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn should_reset(&self, message: &StreamMessage) -> bool {
        self.kinds.contains(&message.event_kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(kind: &str) -> StreamMessage {
        StreamMessage::new("k", kind, 1_i64, serde_json::Value::Null)
    }

    #[test]
    fn only_configured_kinds_reset() {
        let policy = StateResetPolicy::new(["Rebuilt"]);

        assert!(policy.should_reset(&message("Rebuilt")));
        assert!(!policy.should_reset(&message("Updated")));
        assert!(!policy.should_reset(&message("rebuilt")));
    }

    #[test]
    fn empty_policy_never_resets() {
        assert!(!StateResetPolicy::none().should_reset(&message("Rebuilt")));
        assert_eq!(StateResetPolicy::none().kinds().count(), 0);
    }
}
