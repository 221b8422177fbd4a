//! Shared types for the grain pipeline.

mod types;

pub use types::{AggregateId, LogicalTimestamp, RoutingKey};
