//! Order summary read model, one grain per order.

use std::collections::BTreeMap;

use common::{AggregateId, RoutingKey};
use domain::{CustomerId, Money, OrderEvent, OrderItem, OrderStatus, ProductId};
use serde::{Deserialize, Serialize};

use crate::error::HandlerError;
use crate::handler::StatefulGrainHandler;
use crate::message::StreamMessage;

/// Denormalized view of a single order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub order_id: Option<AggregateId>,
    pub customer_id: Option<CustomerId>,
    pub status: OrderStatus,
    pub items: BTreeMap<ProductId, OrderItem>,
    pub total_amount: Money,
    pub cancel_reason: Option<String>,
    pub imported_from: Option<String>,
}

impl OrderSummary {
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    fn recalculate_total(&mut self) {
        self.total_amount = self.items.values().map(OrderItem::line_total).sum();
    }
}

/// Keeps an [`OrderSummary`] per order id.
///
/// `OrderImported` replaces whatever the grain held: an imported order is
/// authoritative, so its grain is rebuilt from empty state.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderSummaryProjection;

impl OrderSummaryProjection {
    pub const NAME: &'static str = "order_summary";
}

impl StatefulGrainHandler for OrderSummaryProjection {
    type State = OrderSummary;

    fn projection(&self) -> &'static str {
        Self::NAME
    }

    fn reset_kinds(&self) -> &'static [&'static str] {
        &["OrderImported"]
    }

    fn routing_key(&self, message: &StreamMessage) -> Result<Option<RoutingKey>, HandlerError> {
        if OrderEvent::KINDS.contains(&message.event_kind.as_str()) {
            Ok(Some(message.routing_key.clone()))
        } else {
            Ok(None)
        }
    }

    fn handle(
        &self,
        message: &StreamMessage,
        mut state: OrderSummary,
    ) -> Result<OrderSummary, HandlerError> {
        match message.decode::<OrderEvent>()? {
            OrderEvent::OrderCreated(data) => {
                state.order_id = Some(data.order_id);
                state.customer_id = Some(data.customer_id);
                state.status = OrderStatus::Draft;
            }
            OrderEvent::ItemAdded(data) => {
                state
                    .items
                    .entry(data.product_id.clone())
                    .and_modify(|item| item.quantity += data.quantity)
                    .or_insert_with(|| {
                        OrderItem::new(
                            data.product_id,
                            data.product_name,
                            data.quantity,
                            data.unit_price,
                        )
                    });
            }
            OrderEvent::ItemRemoved(data) => {
                if state.items.remove(&data.product_id).is_none() {
                    return Err(HandlerError::EventApplication(format!(
                        "item {} is not in the summary",
                        data.product_id
                    )));
                }
            }
            OrderEvent::OrderSubmitted(_) => state.status = OrderStatus::Submitted,
            OrderEvent::OrderCancelled(data) => {
                state.status = OrderStatus::Cancelled;
                state.cancel_reason = Some(data.reason);
            }
            OrderEvent::OrderImported(data) => {
                state = OrderSummary {
                    order_id: Some(data.order_id),
                    customer_id: data.customer_id,
                    status: data.status,
                    items: data
                        .items
                        .into_iter()
                        .map(|item| (item.product_id.clone(), item))
                        .collect(),
                    imported_from: Some(data.source),
                    ..OrderSummary::default()
                };
            }
        }

        state.recalculate_total();
        Ok(state)
    }
}
