//! Append-only event log used by the command side.
//!
//! The log orders events per aggregate by [`Version`] and globally by
//! position, which downstream grains use as their logical timestamp.

pub mod error;
pub mod event;
pub mod memory;
pub mod snapshot;
pub mod store;

pub use common::{AggregateId, LogicalTimestamp};
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventId, Version};
pub use memory::InMemoryEventStore;
pub use snapshot::Snapshot;
pub use store::{AppendOptions, EventStore, EventStoreExt, EventStream};
