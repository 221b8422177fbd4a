//! Idempotent read-side grains fed from the event log.
//!
//! This crate provides the query side:
//! - [`StatefulGrainHandler`], the pure per-projection state update
//! - [`DedupChecker`] and [`StateResetPolicy`], consulted by [`decide`]
//! - [`GrainStore`] with in-memory and PostgreSQL implementations
//! - [`GrainRouter`], a partitioned pool with one writer per key
//! - [`LogFeed`] for pumping the event log into routers
//! - Two order views: order summary and customer orders

pub mod config;
pub mod error;
pub mod feed;
pub mod handler;
pub mod memory;
pub mod message;
pub mod metadata;
pub mod pipeline;
pub mod postgres;
pub mod reset;
pub mod router;
pub mod store;
pub mod views;

pub use config::{FeedConfig, RouterConfig};
pub use error::{GrainError, HandlerError, Result, StoreError};
pub use feed::{FeedProgress, LogFeed};
pub use handler::StatefulGrainHandler;
pub use memory::InMemoryGrainStore;
pub use message::StreamMessage;
pub use metadata::{DedupChecker, GrainMetadata};
pub use pipeline::{Disposition, Evaluation, decide, evaluate};
pub use postgres::PostgresGrainStore;
pub use reset::StateResetPolicy;
pub use router::{GrainRouter, MessageRoute, RouteOutcome};
pub use store::{GrainRecord, GrainStore, MetadataStore, ProjectionStore};
pub use views::{CustomerOrders, CustomerOrdersProjection, OrderSummary, OrderSummaryProjection};
