//! Per-projection state update.

use common::RoutingKey;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::HandlerError;
use crate::message::StreamMessage;

/// The read-side logic of one projection kind.
///
/// A handler is a pure function from (message, state) to the next state.
/// Loading, dedup, resets and persistence are the router's job; a handler
/// never sees a message that is already reflected in its state.
pub trait StatefulGrainHandler: Send + Sync + 'static {
    /// Per-key state. `Default` is the empty state a new or reset grain
    /// starts from.
    type State: Serialize + DeserializeOwned + Default + Send + Sync + 'static;

    /// Projection name, used to namespace stored grains and in metrics.
    fn projection(&self) -> &'static str;

    /// Event kinds that rebuild a grain from empty state.
    fn reset_kinds(&self) -> &'static [&'static str] {
        &[]
    }

    /// Resolves the grain that owns `message`.
    ///
    /// Must depend only on message content so that redeliveries land on the
    /// same grain. `None` means the projection ignores the message.
    fn routing_key(&self, message: &StreamMessage) -> Result<Option<RoutingKey>, HandlerError> {
        Ok(Some(message.routing_key.clone()))
    }

    /// Computes the next state.
    fn handle(&self, message: &StreamMessage, state: Self::State)
    -> Result<Self::State, HandlerError>;
}
