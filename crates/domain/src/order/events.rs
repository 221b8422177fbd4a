//! Order domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{CustomerId, Money, OrderItem, OrderStatus, ProductId};

/// Events that can occur on an order aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    OrderCreated(OrderCreatedData),
    ItemAdded(ItemAddedData),
    ItemRemoved(ItemRemovedData),
    OrderSubmitted(OrderSubmittedData),
    OrderCancelled(OrderCancelledData),

    /// Order carried over from a legacy system. It may arrive in any
    /// status, with or without items, and bypasses creation rules.
    OrderImported(OrderImportedData),
}

impl OrderEvent {
    pub const KINDS: &'static [&'static str] = &[
        "OrderCreated",
        "ItemAdded",
        "ItemRemoved",
        "OrderSubmitted",
        "OrderCancelled",
        "OrderImported",
    ];

    pub fn order_created(order_id: AggregateId, customer_id: CustomerId) -> Self {
        OrderEvent::OrderCreated(OrderCreatedData {
            order_id,
            customer_id,
            created_at: Utc::now(),
        })
    }

    pub fn item_added(item: &OrderItem) -> Self {
        OrderEvent::ItemAdded(ItemAddedData {
            product_id: item.product_id.clone(),
            product_name: item.product_name.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
        })
    }

    pub fn item_removed(product_id: ProductId) -> Self {
        OrderEvent::ItemRemoved(ItemRemovedData { product_id })
    }

    pub fn order_submitted(total_amount: Money, item_count: usize) -> Self {
        OrderEvent::OrderSubmitted(OrderSubmittedData {
            total_amount,
            item_count,
            submitted_at: Utc::now(),
        })
    }

    pub fn order_cancelled(reason: impl Into<String>) -> Self {
        OrderEvent::OrderCancelled(OrderCancelledData {
            reason: reason.into(),
            cancelled_at: Utc::now(),
        })
    }

    pub fn order_imported(
        order_id: AggregateId,
        customer_id: Option<CustomerId>,
        status: OrderStatus,
        items: Vec<OrderItem>,
        source: impl Into<String>,
    ) -> Self {
        OrderEvent::OrderImported(OrderImportedData {
            order_id,
            customer_id,
            status,
            items,
            source: source.into(),
        })
    }
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "OrderCreated",
            OrderEvent::ItemAdded(_) => "ItemAdded",
            OrderEvent::ItemRemoved(_) => "ItemRemoved",
            OrderEvent::OrderSubmitted(_) => "OrderSubmitted",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
            OrderEvent::OrderImported(_) => "OrderImported",
        }
    }

    fn event_kinds() -> &'static [&'static str] {
        Self::KINDS
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreatedData {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAddedData {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRemovedData {
    pub product_id: ProductId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSubmittedData {
    pub total_amount: Money,
    pub item_count: usize,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderImportedData {
    pub order_id: AggregateId,
    pub customer_id: Option<CustomerId>,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,

    /// Name of the system the order came from.
    pub source: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_reports_a_declared_kind() {
        let item = OrderItem::new("SKU-1", "Widget", 1, Money::from_cents(100));
        let events = vec![
            OrderEvent::order_created(AggregateId::new(), CustomerId::new()),
            OrderEvent::item_added(&item),
            OrderEvent::item_removed(ProductId::new("SKU-1")),
            OrderEvent::order_submitted(Money::from_cents(100), 1),
            OrderEvent::order_cancelled("changed mind"),
            OrderEvent::order_imported(
                AggregateId::new(),
                None,
                OrderStatus::Submitted,
                vec![],
                "legacy",
            ),
        ];

        for event in &events {
            assert!(OrderEvent::event_kinds().contains(&event.event_type()));
        }
        assert_eq!(events.len(), OrderEvent::event_kinds().len());
    }

    #[test]
    fn serializes_with_type_tag() {
        let event = OrderEvent::item_removed(ProductId::new("SKU-9"));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "ItemRemoved");
        assert_eq!(json["data"]["product_id"], "SKU-9");
    }
}
