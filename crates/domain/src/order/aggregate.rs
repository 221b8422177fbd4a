//! Order aggregate implementation.

use std::collections::BTreeMap;

use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::applier::EventApplier;
use crate::registry::KindRegistration;

use super::{CustomerId, Money, OrderError, OrderEvent, OrderItem, OrderStatus, ProductId};

/// Order aggregate root.
///
/// Command methods validate against the current state and return the events
/// to record; they never mutate. State only changes through the transitions
/// registered in [`Order::applier`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: Option<AggregateId>,
    customer_id: Option<CustomerId>,
    status: OrderStatus,

    /// Items keyed by product, ordered so serialized state is stable.
    items: BTreeMap<ProductId, OrderItem>,

    /// Set when the order was born from an import rather than `create`.
    imported_from: Option<String>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }
}

// Registration
impl Order {
    /// The zero value replay starts from.
    pub fn blank() -> Self {
        Self::default()
    }

    /// Dispatch table covering every [`OrderEvent`] kind.
    pub fn applier() -> EventApplier<Order> {
        EventApplier::new()
            .on("OrderCreated", apply_order_created)
            .on("ItemAdded", apply_item_added)
            .on("ItemRemoved", apply_item_removed)
            .on("OrderSubmitted", apply_order_submitted)
            .on("OrderCancelled", apply_order_cancelled)
            .on("OrderImported", apply_order_imported)
    }

    pub fn registration() -> KindRegistration<Order> {
        KindRegistration::new(Self::applier()).with_factory(Self::blank)
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> Option<AggregateId> {
        self.id
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> impl Iterator<Item = &OrderItem> {
        self.items.values()
    }

    pub fn get_item(&self, product_id: &ProductId) -> Option<&OrderItem> {
        self.items.get(product_id)
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn total_quantity(&self) -> u32 {
        self.items.values().map(|item| item.quantity).sum()
    }

    pub fn total_amount(&self) -> Money {
        self.items.values().map(OrderItem::line_total).sum()
    }

    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }

    pub fn is_created(&self) -> bool {
        self.id.is_some()
    }

    pub fn imported_from(&self) -> Option<&str> {
        self.imported_from.as_deref()
    }
}

// Command methods (return events)
impl Order {
    /// Creates a new draft order for a customer.
    pub fn create(
        &self,
        order_id: AggregateId,
        customer_id: CustomerId,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.is_created() {
            return Err(OrderError::AlreadyCreated);
        }

        Ok(vec![OrderEvent::order_created(order_id, customer_id)])
    }

    /// Brings in an order from another system as-is.
    ///
    /// Only identity is checked. The imported status and items are taken on
    /// trust, so this can produce a submitted order with no items, which
    /// `create` followed by `submit` never can.
    pub fn import(
        &self,
        order_id: AggregateId,
        customer_id: Option<CustomerId>,
        status: OrderStatus,
        items: Vec<OrderItem>,
        source: impl Into<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.is_created() {
            return Err(OrderError::AlreadyCreated);
        }

        Ok(vec![OrderEvent::order_imported(
            order_id,
            customer_id,
            status,
            items,
            source,
        )])
    }

    /// Adds an item. Adding a product already in the order increases its
    /// quantity.
    pub fn add_item(&self, item: OrderItem) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_created()?;
        if !self.status.can_modify_items() {
            return Err(OrderError::InvalidStateTransition {
                status: self.status,
                action: "add item",
            });
        }

        if item.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                quantity: item.quantity,
            });
        }

        if !item.unit_price.is_positive() {
            return Err(OrderError::InvalidPrice {
                price: item.unit_price.cents(),
            });
        }

        Ok(vec![OrderEvent::item_added(&item)])
    }

    pub fn remove_item(&self, product_id: ProductId) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_created()?;
        if !self.status.can_modify_items() {
            return Err(OrderError::InvalidStateTransition {
                status: self.status,
                action: "remove item",
            });
        }

        if !self.items.contains_key(&product_id) {
            return Err(OrderError::ItemNotFound {
                product_id: product_id.to_string(),
            });
        }

        Ok(vec![OrderEvent::item_removed(product_id)])
    }

    pub fn submit(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_created()?;
        if self.status != OrderStatus::Draft {
            return Err(OrderError::InvalidStateTransition {
                status: self.status,
                action: "submit",
            });
        }

        if !self.has_items() {
            return Err(OrderError::NoItems);
        }

        Ok(vec![OrderEvent::order_submitted(
            self.total_amount(),
            self.items.len(),
        )])
    }

    pub fn cancel(&self, reason: impl Into<String>) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_created()?;
        if !self.status.can_cancel() {
            return Err(OrderError::InvalidStateTransition {
                status: self.status,
                action: "cancel",
            });
        }

        Ok(vec![OrderEvent::order_cancelled(reason)])
    }

    fn ensure_created(&self) -> Result<(), OrderError> {
        if self.is_created() {
            Ok(())
        } else {
            Err(OrderError::NotCreated)
        }
    }
}

fn apply_order_created(order: &mut Order, event: &OrderEvent) {
    if let OrderEvent::OrderCreated(data) = event {
        order.id = Some(data.order_id);
        order.customer_id = Some(data.customer_id);
        order.status = OrderStatus::Draft;
    }
}

fn apply_item_added(order: &mut Order, event: &OrderEvent) {
    if let OrderEvent::ItemAdded(data) = event {
        order
            .items
            .entry(data.product_id.clone())
            .and_modify(|item| item.quantity += data.quantity)
            .or_insert_with(|| {
                OrderItem::new(
                    data.product_id.clone(),
                    data.product_name.clone(),
                    data.quantity,
                    data.unit_price,
                )
            });
    }
}

fn apply_item_removed(order: &mut Order, event: &OrderEvent) {
    if let OrderEvent::ItemRemoved(data) = event {
        order.items.remove(&data.product_id);
    }
}

fn apply_order_submitted(order: &mut Order, _: &OrderEvent) {
    order.status = OrderStatus::Submitted;
}

fn apply_order_cancelled(order: &mut Order, _: &OrderEvent) {
    order.status = OrderStatus::Cancelled;
}

/// Replaces whatever was there with the imported snapshot of the order.
fn apply_order_imported(order: &mut Order, event: &OrderEvent) {
    if let OrderEvent::OrderImported(data) = event {
        *order = Order {
            id: Some(data.order_id),
            customer_id: data.customer_id,
            status: data.status,
            items: data
                .items
                .iter()
                .map(|item| (item.product_id.clone(), item.clone()))
                .collect(),
            imported_from: Some(data.source.clone()),
        };
    }
}
