//! Order aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod state;
mod value_objects;

pub use aggregate::Order;
pub use commands::*;
pub use events::{
    ItemAddedData, ItemRemovedData, OrderCancelledData, OrderCreatedData, OrderEvent,
    OrderImportedData, OrderSubmittedData,
};
pub use service::OrderService;
pub use state::OrderStatus;
pub use value_objects::{CustomerId, Money, OrderItem, ProductId};

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order is not in a status that allows the action.
    #[error("Invalid state transition: cannot {action} from {status} status")]
    InvalidStateTransition {
        status: OrderStatus,
        action: &'static str,
    },

    #[error("Item not found: {product_id}")]
    ItemNotFound { product_id: String },

    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    #[error("Invalid price: {price} (must be greater than 0)")]
    InvalidPrice { price: i64 },

    #[error("Order has no items")]
    NoItems,

    #[error("Order already created")]
    AlreadyCreated,

    /// The command needs an existing order.
    #[error("Order has not been created")]
    NotCreated,
}
