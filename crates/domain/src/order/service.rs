//! Order service providing a simplified API for order operations.

use std::sync::Arc;

use common::AggregateId;
use event_store::EventStore;

use crate::error::DomainError;
use crate::registry::AggregateRegistry;
use crate::repository::{AggregateRepository, CommandResult};

use super::{
    AddItem, CancelOrder, CreateOrder, CustomerId, ImportOrder, Money, Order, OrderItem,
    ProductId, RemoveItem, SubmitOrder,
};

/// Service for managing orders.
///
/// Wraps an [`AggregateRepository`] and maps each command onto the matching
/// `Order` command method.
pub struct OrderService<S: EventStore> {
    repository: AggregateRepository<S, Order>,
}

impl<S: EventStore> OrderService<S> {
    /// The registry must contain the `Order` kind.
    pub fn new(store: S, registry: Arc<AggregateRegistry>) -> Self {
        Self {
            repository: AggregateRepository::new(store, registry),
        }
    }

    pub fn with_snapshot_every(mut self, interval: u64) -> Self {
        self.repository = self.repository.with_snapshot_every(interval);
        self
    }

    pub fn repository(&self) -> &AggregateRepository<S, Order> {
        &self.repository
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_order(
        &self,
        cmd: CreateOrder,
    ) -> Result<CommandResult<Order>, DomainError> {
        let CreateOrder {
            order_id,
            customer_id,
        } = cmd;

        self.repository
            .execute(order_id, |order| order.create(order_id, customer_id))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn import_order(
        &self,
        cmd: ImportOrder,
    ) -> Result<CommandResult<Order>, DomainError> {
        let order_id = cmd.order_id;

        self.repository
            .execute(order_id, |order| {
                order.import(
                    cmd.order_id,
                    cmd.customer_id,
                    cmd.status,
                    cmd.items,
                    cmd.source,
                )
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_item(&self, cmd: AddItem) -> Result<CommandResult<Order>, DomainError> {
        self.repository
            .execute(cmd.order_id, |order| order.add_item(cmd.item))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_item(&self, cmd: RemoveItem) -> Result<CommandResult<Order>, DomainError> {
        self.repository
            .execute(cmd.order_id, |order| order.remove_item(cmd.product_id))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn submit_order(
        &self,
        cmd: SubmitOrder,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.repository
            .execute(cmd.order_id, |order| order.submit())
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        cmd: CancelOrder,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.repository
            .execute(cmd.order_id, |order| order.cancel(cmd.reason))
            .await
    }

    /// Loads an order by ID, or `None` if it has no events.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        Ok(self
            .repository
            .load_existing(order_id)
            .await?
            .map(|root| root.into_state()))
    }

    /// Creates an order and adds each item in turn.
    pub async fn create_order_with_items(
        &self,
        customer_id: CustomerId,
        items: Vec<OrderItem>,
    ) -> Result<CommandResult<Order>, DomainError> {
        let order_id = AggregateId::new();
        let mut result = self
            .create_order(CreateOrder::new(order_id, customer_id))
            .await?;

        for item in items {
            result = self.add_item(AddItem::new(order_id, item)).await?;
        }

        Ok(result)
    }

    pub async fn add_item_to_order(
        &self,
        order_id: AggregateId,
        product_id: impl Into<ProductId>,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.add_item(AddItem::with_details(
            order_id,
            product_id,
            product_name,
            quantity,
            unit_price,
        ))
        .await
    }
}
