//! Orders per customer, one grain per customer id.

use common::{AggregateId, RoutingKey};
use domain::order::OrderImportedData;
use domain::{CustomerId, OrderEvent};
use serde::{Deserialize, Serialize};

use crate::error::HandlerError;
use crate::handler::StatefulGrainHandler;
use crate::message::StreamMessage;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerOrders {
    pub customer_id: Option<CustomerId>,
    /// Orders in the order they were first seen.
    pub order_ids: Vec<AggregateId>,
    pub imported_orders: u64,
}

impl CustomerOrders {
    pub fn order_count(&self) -> usize {
        self.order_ids.len()
    }
}

/// Groups orders under the customer that placed them.
///
/// The grain key comes from the event payload, not from the aggregate id.
/// Only events that name a customer are routed; the rest are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct CustomerOrdersProjection;

impl CustomerOrdersProjection {
    pub const NAME: &'static str = "customer_orders";

    fn owner(event: &OrderEvent) -> Option<CustomerId> {
        match event {
            OrderEvent::OrderCreated(data) => Some(data.customer_id),
            OrderEvent::OrderImported(data) => data.customer_id,
            _ => None,
        }
    }
}

impl StatefulGrainHandler for CustomerOrdersProjection {
    type State = CustomerOrders;

    fn projection(&self) -> &'static str {
        Self::NAME
    }

    fn routing_key(&self, message: &StreamMessage) -> Result<Option<RoutingKey>, HandlerError> {
        if !matches!(message.event_kind.as_str(), "OrderCreated" | "OrderImported") {
            return Ok(None);
        }
        let event = message.decode::<OrderEvent>()?;
        Ok(Self::owner(&event).map(|customer| RoutingKey::new(customer.to_string())))
    }

    fn handle(
        &self,
        message: &StreamMessage,
        mut state: CustomerOrders,
    ) -> Result<CustomerOrders, HandlerError> {
        let (customer_id, order_id) = match message.decode::<OrderEvent>()? {
            OrderEvent::OrderCreated(data) => (data.customer_id, data.order_id),
            OrderEvent::OrderImported(OrderImportedData {
                customer_id: Some(customer_id),
                order_id,
                ..
            }) => {
                state.imported_orders += 1;
                (customer_id, order_id)
            }
            _ => {
                return Err(HandlerError::UnhandledEventKind {
                    event_kind: message.event_kind.clone(),
                });
            }
        };

        state.customer_id = Some(customer_id);
        if !state.order_ids.contains(&order_id) {
            state.order_ids.push(order_id);
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::OrderStatus;

    fn message(event: &OrderEvent, ts: i64) -> StreamMessage {
        StreamMessage::new(
            AggregateId::new(),
            domain::DomainEvent::event_type(event),
            ts,
            serde_json::to_value(event).unwrap(),
        )
    }

    #[test]
    fn routes_by_customer_not_by_order() {
        let customer = CustomerId::new();
        let created = message(&OrderEvent::order_created(AggregateId::new(), customer), 1);

        let key = CustomerOrdersProjection.routing_key(&created).unwrap();
        assert_eq!(key, Some(RoutingKey::new(customer.to_string())));
        assert_ne!(key, Some(created.routing_key.clone()));
    }

    #[test]
    fn events_without_customer_are_ignored() {
        let submitted = message(
            &OrderEvent::order_submitted(domain::Money::from_cents(10), 1),
            1,
        );
        let anonymous = message(
            &OrderEvent::order_imported(AggregateId::new(), None, OrderStatus::Draft, vec![], "erp"),
            2,
        );

        assert_eq!(CustomerOrdersProjection.routing_key(&submitted).unwrap(), None);
        assert_eq!(CustomerOrdersProjection.routing_key(&anonymous).unwrap(), None);
    }

    #[test]
    fn collects_orders_once() {
        let customer = CustomerId::new();
        let first = AggregateId::new();
        let second = AggregateId::new();

        let state = [
            OrderEvent::order_created(first, customer),
            OrderEvent::order_imported(second, Some(customer), OrderStatus::Submitted, vec![], "erp"),
            OrderEvent::order_created(first, customer),
        ]
        .iter()
        .enumerate()
        .fold(CustomerOrders::default(), |state, (i, event)| {
            CustomerOrdersProjection
                .handle(&message(event, i as i64 + 1), state)
                .unwrap()
        });

        assert_eq!(state.customer_id, Some(customer));
        assert_eq!(state.order_ids, vec![first, second]);
        assert_eq!(state.imported_orders, 1);
    }
}
