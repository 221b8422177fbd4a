//! Aggregate engine for the event-sourcing system.
//!
//! This crate provides:
//! - `Aggregate` and `DomainEvent` traits for event-sourced entities
//! - `EventApplier`, the per-kind dispatch table of state transitions
//! - `AggregateRegistry` with its start-up readiness check
//! - `AggregateRoot`, tracking version and uncommitted events
//! - `AggregateRepository` for loading, saving and snapshotting
//! - A sample `Order` aggregate

pub mod aggregate;
pub mod applier;
pub mod error;
pub mod order;
pub mod registry;
pub mod repository;

pub use aggregate::{Aggregate, AggregateRoot, DomainEvent};
pub use applier::{ApplyFn, EventApplier};
pub use error::{AggregateError, DomainError, RegistryError};
pub use order::{
    AddItem, CancelOrder, CreateOrder, CustomerId, ImportOrder, Money, Order, OrderError,
    OrderEvent, OrderItem, OrderService, OrderStatus, ProductId, RemoveItem, SubmitOrder,
};
pub use registry::{AggregateRegistry, KindRegistration, ZeroFn};
pub use repository::{AggregateRepository, CommandResult};
