//! Pumps the event log into grain routers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use event_store::{EventEnvelope, EventStore};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::FeedConfig;
use crate::error::{GrainError, Result};
use crate::message::StreamMessage;
use crate::router::{MessageRoute, RouteOutcome};

/// What one catch-up pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedProgress {
    /// Events read from the log during the pass.
    pub events: u64,

    /// Log position the feed has read up to.
    pub position: u64,
}

/// A registered route and how far it has been fed.
struct Subscription {
    route: Arc<dyn MessageRoute>,
    position: AtomicU64,
    halted: AtomicBool,
}

impl Subscription {
    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::SeqCst)
    }
}

/// Reads the log in position order and delivers each event to every
/// registered route.
///
/// Each route keeps its own checkpoint. Delivery is at-least-once: an event
/// a route has not yet accepted is delivered again on the next pass, and the
/// grains' dedup drops the repeats. A route that hits a defect is halted at
/// the failing event while the other routes keep advancing.
pub struct LogFeed<S: EventStore> {
    store: S,
    subscriptions: Vec<Subscription>,
    config: FeedConfig,
    position: AtomicU64,
}

impl<S: EventStore> LogFeed<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, FeedConfig::default())
    }

    pub fn with_config(store: S, config: FeedConfig) -> Self {
        Self {
            store,
            subscriptions: Vec::new(),
            config,
            position: AtomicU64::new(0),
        }
    }

    /// Resumes from a previously recorded checkpoint.
    pub fn starting_after(self, position: u64) -> Self {
        self.position.store(position, Ordering::SeqCst);
        for subscription in &self.subscriptions {
            subscription.position.store(position, Ordering::SeqCst);
        }
        self
    }

    /// Adds a route, fed from the feed's current position onwards.
    pub fn register(&mut self, route: Arc<dyn MessageRoute>) {
        self.subscriptions.push(Subscription {
            route,
            position: AtomicU64::new(self.position()),
            halted: AtomicBool::new(false),
        });
    }

    /// Log position every running route has been fed up to.
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::SeqCst)
    }

    /// Checkpoint of one route, `None` if no route has that projection.
    pub fn route_position(&self, projection: &str) -> Option<u64> {
        self.subscription(projection).map(Subscription::position)
    }

    /// Projections whose routes stopped on a defect.
    pub fn halted(&self) -> Vec<&'static str> {
        self.subscriptions
            .iter()
            .filter(|s| s.is_halted())
            .map(|s| s.route.projection())
            .collect()
    }

    /// Delivers every event after the checkpoint.
    ///
    /// Stops early without error when `cancel` fires. Retryable failures are
    /// retried with backoff; once retries run out the pass returns the error
    /// and the next pass resumes from the same checkpoint. A defect halts
    /// only the route that raised it.
    #[tracing::instrument(skip(self, cancel), fields(from = self.position()))]
    pub async fn catch_up(&self, cancel: &CancellationToken) -> Result<FeedProgress> {
        let mut stream = self.store.stream_after(self.position()).await?;
        let mut events = 0u64;

        while let Some(envelope) = stream.next().await {
            if cancel.is_cancelled() {
                break;
            }
            let envelope = envelope?;
            let message = StreamMessage::from(&envelope);

            for subscription in &self.subscriptions {
                if subscription.is_halted() || subscription.position() >= envelope.position {
                    continue;
                }

                match self.deliver(subscription.route.as_ref(), &message, cancel).await {
                    Ok(_) => subscription
                        .position
                        .store(envelope.position, Ordering::SeqCst),
                    Err(GrainError::Cancelled) => return Ok(self.progress(events)),
                    Err(err) if err.is_retryable() || matches!(err, GrainError::RouterClosed) => {
                        tracing::warn!(
                            projection = subscription.route.projection(),
                            position = envelope.position,
                            error = %err,
                            "catch-up interrupted"
                        );
                        return Err(err);
                    }
                    Err(err) => self.halt(subscription, &envelope, &err),
                }
            }

            self.position.store(envelope.position, Ordering::SeqCst);
            events += 1;
            metrics::counter!("grains_feed_events_total").increment(1);
            metrics::gauge!("grains_feed_position").set(envelope.position as f64);
        }

        let progress = self.progress(events);
        if events > 0 {
            tracing::info!(
                events = progress.events,
                position = progress.position,
                "catch-up complete"
            );
        }
        Ok(progress)
    }

    /// Runs `catch_up` every `poll_interval` until cancelled.
    ///
    /// A pass that runs out of retries is picked up again on the next poll
    /// from the unchanged checkpoint. Only non-retryable errors end the loop.
    pub async fn follow(&self, cancel: &CancellationToken, poll_interval: Duration) -> Result<()> {
        loop {
            match self.catch_up(cancel).await {
                Ok(_) => {}
                Err(err) if err.is_retryable() => {
                    metrics::counter!("grains_feed_stalls_total").increment(1);
                    tracing::warn!(
                        position = self.position(),
                        error = %err,
                        "catch-up stalled, resuming on next poll"
                    );
                }
                Err(err) => return Err(err),
            }
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    async fn deliver(
        &self,
        route: &dyn MessageRoute,
        message: &StreamMessage,
        cancel: &CancellationToken,
    ) -> Result<RouteOutcome> {
        let mut attempt = 0;
        loop {
            match route.route(message.clone(), cancel).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.backoff(attempt);
                    metrics::counter!("grains_feed_retries_total", "projection" => route.projection())
                        .increment(1);
                    tracing::warn!(
                        projection = route.projection(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying delivery"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Err(GrainError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn halt(&self, subscription: &Subscription, envelope: &EventEnvelope, err: &GrainError) {
        subscription.halted.store(true, Ordering::SeqCst);
        let projection = subscription.route.projection();
        metrics::counter!("grains_feed_halts_total", "projection" => projection).increment(1);
        tracing::error!(
            projection,
            position = envelope.position,
            event_type = %envelope.event_type,
            error = %err,
            "route halted"
        );
    }

    fn subscription(&self, projection: &str) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .find(|s| s.route.projection() == projection)
    }

    fn progress(&self, events: u64) -> FeedProgress {
        FeedProgress {
            events,
            position: self.position(),
        }
    }
}
