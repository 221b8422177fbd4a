//! Process wiring for the aggregate engine and the grain routers.
//!
//! Builds the aggregate registry, the event log, the grain store and one
//! router per order view, then follows the log until shut down.

pub mod config;

use std::sync::Arc;

use common::AggregateId;
use domain::{
    AddItem, AggregateRegistry, CreateOrder, CustomerId, DomainError, Money, Order, OrderItem,
    OrderService, RegistryError, SubmitOrder,
};
use event_store::{EventStore, InMemoryEventStore};
use grains::{
    CustomerOrdersProjection, GrainError, GrainRouter, GrainStore, InMemoryGrainStore, LogFeed,
    OrderSummaryProjection, PostgresGrainStore, StoreError,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use config::{Config, LogFormat};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Grain store error: {0}")]
    Store(#[from] StoreError),

    #[error("Grain error: {0}")]
    Grain(#[from] GrainError),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Metrics error: {0}")]
    Metrics(String),
}

/// Installs the global tracing subscriber.
pub fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Installs the Prometheus recorder and its scrape listener.
pub fn install_metrics(config: &Config) -> Result<(), NodeError> {
    let addr: std::net::SocketAddr = config
        .metrics_addr
        .parse()
        .map_err(|e: std::net::AddrParseError| NodeError::Metrics(e.to_string()))?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| NodeError::Metrics(e.to_string()))?;

    tracing::info!(%addr, "metrics listener started");
    Ok(())
}

/// Registers every aggregate kind and runs the readiness check.
pub fn build_registry() -> Result<Arc<AggregateRegistry>, NodeError> {
    let mut registry = AggregateRegistry::new();
    registry.register(Order::registration())?;
    registry.ensure_ready()?;
    Ok(Arc::new(registry))
}

/// PostgreSQL when `DATABASE_URL` is set, otherwise in memory.
pub async fn connect_grain_store(config: &Config) -> Result<Arc<dyn GrainStore>, NodeError> {
    match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(config.workers.clamp(2, 32) as u32)
                .connect(url)
                .await?;
            let store = PostgresGrainStore::new(pool);
            store.create_schema().await?;
            tracing::info!("using PostgreSQL grain store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::info!("using in-memory grain store");
            Ok(Arc::new(InMemoryGrainStore::new()))
        }
    }
}

/// A running node: the command side plus the routers fed from its log.
pub struct Node<S: EventStore + Clone> {
    orders: OrderService<S>,
    feed: LogFeed<S>,
    summaries: Arc<GrainRouter<OrderSummaryProjection>>,
    customers: Arc<GrainRouter<CustomerOrdersProjection>>,
    config: Config,
}

impl Node<InMemoryEventStore> {
    /// Builds a node over a fresh in-memory event log.
    pub async fn start(config: Config) -> Result<Self, NodeError> {
        let grains = connect_grain_store(&config).await?;
        Node::with_stores(config, InMemoryEventStore::new(), grains)
    }
}

impl<S: EventStore + Clone> Node<S> {
    /// Must be called inside a tokio runtime.
    pub fn with_stores(
        config: Config,
        events: S,
        grains: Arc<dyn GrainStore>,
    ) -> Result<Self, NodeError> {
        let registry = build_registry()?;
        let orders = OrderService::new(events.clone(), registry)
            .with_snapshot_every(config.snapshot_interval);

        let summaries = Arc::new(GrainRouter::spawn(
            Arc::new(OrderSummaryProjection),
            Arc::clone(&grains),
            config.router_config(),
        ));
        let customers = Arc::new(GrainRouter::spawn(
            Arc::new(CustomerOrdersProjection),
            grains,
            config.router_config(),
        ));

        let mut feed = LogFeed::new(events);
        feed.register(summaries.clone());
        feed.register(customers.clone());

        Ok(Self {
            orders,
            feed,
            summaries,
            customers,
            config,
        })
    }

    pub fn orders(&self) -> &OrderService<S> {
        &self.orders
    }

    pub fn feed(&self) -> &LogFeed<S> {
        &self.feed
    }

    /// Creates `count` submitted sample orders.
    pub async fn seed_orders(&self, count: usize) -> Result<Vec<AggregateId>, NodeError> {
        let mut ids = Vec::with_capacity(count);
        for n in 0..count {
            let order_id = AggregateId::new();
            self.orders
                .create_order(CreateOrder::new(order_id, CustomerId::new()))
                .await?;
            let item = OrderItem::new(
                format!("SKU-{n:03}").as_str(),
                "Sample",
                1 + (n % 3) as u32,
                Money::from_cents(250 * (n as i64 + 1)),
            );
            self.orders.add_item(AddItem::new(order_id, item)).await?;
            self.orders.submit_order(SubmitOrder::new(order_id)).await?;
            ids.push(order_id);
        }
        if count > 0 {
            tracing::info!(count, "seeded sample orders");
        }
        Ok(ids)
    }

    /// Follows the log until `cancel` fires.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), NodeError> {
        tracing::info!(
            workers = self.config.workers,
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "following event log"
        );
        self.feed.follow(cancel, self.config.poll_interval).await?;
        Ok(())
    }

    /// Drains and stops both routers.
    pub async fn shutdown(&self) {
        self.summaries.shutdown().await;
        self.customers.shutdown().await;
        tracing::info!(position = self.feed.position(), "node stopped");
    }
}
