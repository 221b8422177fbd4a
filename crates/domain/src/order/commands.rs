//! Order commands.

use common::AggregateId;

use super::{CustomerId, Money, OrderItem, OrderStatus, ProductId};

/// Command to create a new order.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
}

impl CreateOrder {
    pub fn new(order_id: AggregateId, customer_id: CustomerId) -> Self {
        Self {
            order_id,
            customer_id,
        }
    }

    /// Creates the command with a generated order ID.
    pub fn for_customer(customer_id: CustomerId) -> Self {
        Self::new(AggregateId::new(), customer_id)
    }
}

/// Command to add an item to an order.
#[derive(Debug, Clone)]
pub struct AddItem {
    pub order_id: AggregateId,
    pub item: OrderItem,
}

impl AddItem {
    pub fn new(order_id: AggregateId, item: OrderItem) -> Self {
        Self { order_id, item }
    }

    pub fn with_details(
        order_id: AggregateId,
        product_id: impl Into<ProductId>,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            order_id,
            item: OrderItem::new(product_id, product_name, quantity, unit_price),
        }
    }
}

/// Command to remove an item from an order.
#[derive(Debug, Clone)]
pub struct RemoveItem {
    pub order_id: AggregateId,
    pub product_id: ProductId,
}

impl RemoveItem {
    pub fn new(order_id: AggregateId, product_id: impl Into<ProductId>) -> Self {
        Self {
            order_id,
            product_id: product_id.into(),
        }
    }
}

/// Command to submit an order.
#[derive(Debug, Clone)]
pub struct SubmitOrder {
    pub order_id: AggregateId,
}

impl SubmitOrder {
    pub fn new(order_id: AggregateId) -> Self {
        Self { order_id }
    }
}

/// Command to cancel an order.
#[derive(Debug, Clone)]
pub struct CancelOrder {
    pub order_id: AggregateId,
    pub reason: String,
}

impl CancelOrder {
    pub fn new(order_id: AggregateId, reason: impl Into<String>) -> Self {
        Self {
            order_id,
            reason: reason.into(),
        }
    }
}

/// Command to bring an order over from another system.
#[derive(Debug, Clone)]
pub struct ImportOrder {
    pub order_id: AggregateId,
    pub customer_id: Option<CustomerId>,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub source: String,
}

impl ImportOrder {
    pub fn new(order_id: AggregateId, status: OrderStatus, source: impl Into<String>) -> Self {
        Self {
            order_id,
            customer_id: None,
            status,
            items: Vec::new(),
            source: source.into(),
        }
    }

    pub fn with_customer(mut self, customer_id: CustomerId) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    pub fn with_items(mut self, items: Vec<OrderItem>) -> Self {
        self.items = items;
        self
    }
}
