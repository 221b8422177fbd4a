//! Read-side projections of the order aggregate.

mod customer_orders;
mod order_summary;

pub use customer_orders::{CustomerOrders, CustomerOrdersProjection};
pub use order_summary::{OrderSummary, OrderSummaryProjection};
