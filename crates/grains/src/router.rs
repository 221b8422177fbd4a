//! Partitioned single-writer routing of stream messages to grains.
//!
//! Every routing key hashes to exactly one worker. A worker handles its
//! queue one message at a time, so the load, decide, commit span for a key
//! never overlaps with another message for the same key. Unrelated keys on
//! different workers proceed concurrently.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use common::{LogicalTimestamp, RoutingKey};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RouterConfig;
use crate::error::{GrainError, Result};
use crate::handler::StatefulGrainHandler;
use crate::message::StreamMessage;
use crate::pipeline::{self, Disposition, Evaluation};
use crate::reset::StateResetPolicy;
use crate::store::GrainStore;

/// What routing a message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The projection does not track this message.
    Ignored,

    Routed {
        routing_key: RoutingKey,
        disposition: Disposition,
        /// The key's watermark after the message was handled.
        watermark: LogicalTimestamp,
    },
}

impl RouteOutcome {
    pub fn disposition(&self) -> Option<Disposition> {
        match self {
            RouteOutcome::Ignored => None,
            RouteOutcome::Routed { disposition, .. } => Some(*disposition),
        }
    }

    pub fn watermark(&self) -> Option<LogicalTimestamp> {
        match self {
            RouteOutcome::Ignored => None,
            RouteOutcome::Routed { watermark, .. } => Some(*watermark),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            RouteOutcome::Ignored => "ignored",
            RouteOutcome::Routed { disposition, .. } => disposition.as_str(),
        }
    }
}

/// A destination for stream messages, independent of its state type.
#[async_trait]
pub trait MessageRoute: Send + Sync {
    fn projection(&self) -> &'static str;

    async fn route(&self, message: StreamMessage, cancel: &CancellationToken)
    -> Result<RouteOutcome>;
}

struct Job {
    routing_key: RoutingKey,
    message: StreamMessage,
    cancel: CancellationToken,
    reply: oneshot::Sender<Result<RouteOutcome>>,
}

/// Routes messages for one projection to a fixed pool of workers.
pub struct GrainRouter<H: StatefulGrainHandler> {
    handler: Arc<H>,
    senders: Vec<mpsc::Sender<Job>>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<H: StatefulGrainHandler> GrainRouter<H> {
    /// Starts the worker pool. Must be called inside a tokio runtime.
    pub fn spawn(handler: Arc<H>, store: Arc<dyn GrainStore>, config: RouterConfig) -> Self {
        let policy = Arc::new(StateResetPolicy::new(handler.reset_kinds().iter().copied()));
        let shutdown = CancellationToken::new();
        let worker_count = config.workers.max(1);
        let capacity = config.channel_capacity.max(1);

        let mut senders = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let (tx, rx) = mpsc::channel(capacity);
            senders.push(tx);
            workers.push(tokio::spawn(run_worker(
                index,
                Arc::clone(&handler),
                Arc::clone(&store),
                Arc::clone(&policy),
                rx,
                shutdown.clone(),
            )));
        }

        tracing::info!(
            projection = handler.projection(),
            workers = worker_count,
            reset_kinds = ?policy.kinds().collect::<Vec<_>>(),
            "grain router started"
        );

        Self {
            handler,
            senders,
            shutdown,
            workers: Mutex::new(workers),
        }
    }

    pub fn projection(&self) -> &'static str {
        self.handler.projection()
    }

    pub fn worker_count(&self) -> usize {
        self.senders.len()
    }

    /// The worker that owns `key`. Stable for the life of the router.
    pub fn partition_for(&self, key: &RoutingKey) -> usize {
        partition(key, self.senders.len())
    }

    /// Resolves the message's grain and runs it through dedup, reset and
    /// apply on the owning worker.
    ///
    /// Safe to call any number of times with the same message. If `cancel`
    /// fires before the commit starts, nothing is written and
    /// [`GrainError::Cancelled`] is returned.
    #[tracing::instrument(
        skip(self, message, cancel),
        fields(
            projection = self.handler.projection(),
            event_kind = %message.event_kind,
            occurred_at = %message.occurred_at,
        )
    )]
    pub async fn route_to_grain(
        &self,
        message: StreamMessage,
        cancel: &CancellationToken,
    ) -> Result<RouteOutcome> {
        let start = Instant::now();
        let projection = self.handler.projection();

        let result = self.dispatch(message, cancel).await;

        metrics::histogram!("grains_route_duration_seconds", "projection" => projection)
            .record(start.elapsed().as_secs_f64());
        let outcome = match &result {
            Ok(outcome) => outcome.label(),
            Err(err) => err.kind(),
        };
        metrics::counter!("grains_messages_total", "projection" => projection, "outcome" => outcome)
            .increment(1);

        result
    }

    async fn dispatch(
        &self,
        message: StreamMessage,
        cancel: &CancellationToken,
    ) -> Result<RouteOutcome> {
        let routing_key = self
            .handler
            .routing_key(&message)
            .map_err(|err| GrainError::from_handler(self.handler.projection(), err))?;
        let Some(routing_key) = routing_key else {
            return Ok(RouteOutcome::Ignored);
        };

        if self.shutdown.is_cancelled() {
            return Err(GrainError::RouterClosed);
        }

        let (reply, response) = oneshot::channel();
        let worker = self.partition_for(&routing_key);
        self.senders[worker]
            .send(Job {
                routing_key,
                message,
                cancel: cancel.clone(),
                reply,
            })
            .await
            .map_err(|_| GrainError::RouterClosed)?;

        response.await.map_err(|_| GrainError::RouterClosed)?
    }

    /// Stops accepting messages, lets workers finish what is queued, and
    /// waits for them to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(err) = worker.await {
                tracing::error!(error = %err, "grain worker panicked");
            }
        }
        tracing::info!(projection = self.handler.projection(), "grain router stopped");
    }
}

#[async_trait]
impl<H: StatefulGrainHandler> MessageRoute for GrainRouter<H> {
    fn projection(&self) -> &'static str {
        self.handler.projection()
    }

    async fn route(
        &self,
        message: StreamMessage,
        cancel: &CancellationToken,
    ) -> Result<RouteOutcome> {
        self.route_to_grain(message, cancel).await
    }
}

fn partition(key: &RoutingKey, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as usize
}

async fn run_worker<H: StatefulGrainHandler>(
    index: usize,
    handler: Arc<H>,
    store: Arc<dyn GrainStore>,
    policy: Arc<StateResetPolicy>,
    mut jobs: mpsc::Receiver<Job>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => handle_job(&*handler, &*store, &policy, job).await,
                None => return,
            },
        }
    }

    jobs.close();
    let mut drained = 0usize;
    while let Some(job) = jobs.recv().await {
        handle_job(&*handler, &*store, &policy, job).await;
        drained += 1;
    }
    tracing::debug!(worker = index, drained, "grain worker drained");
}

async fn handle_job<H: StatefulGrainHandler>(
    handler: &H,
    store: &dyn GrainStore,
    policy: &StateResetPolicy,
    job: Job,
) {
    let result = process(handler, store, policy, &job).await;

    if let Err(err) = &result {
        log_failure(handler.projection(), &job, err);
    }

    // The caller may have gone away; the outcome is already durable.
    let _ = job.reply.send(result);
}

async fn process<H: StatefulGrainHandler>(
    handler: &H,
    store: &dyn GrainStore,
    policy: &StateResetPolicy,
    job: &Job,
) -> Result<RouteOutcome> {
    let projection = handler.projection();
    let key = &job.routing_key;

    if job.cancel.is_cancelled() {
        return Err(GrainError::Cancelled);
    }

    let record = store.load(projection, key).await?;
    let expected = record.watermark();

    match pipeline::evaluate(handler, &job.message, record, policy)? {
        Evaluation::Stale { watermark } => {
            tracing::debug!(
                projection,
                routing_key = %key,
                occurred_at = %job.message.occurred_at,
                %watermark,
                "dropping already processed message"
            );
            Ok(RouteOutcome::Routed {
                routing_key: key.clone(),
                disposition: Disposition::Stale,
                watermark,
            })
        }
        Evaluation::Commit {
            disposition,
            state,
            metadata,
        } => {
            let state = serde_json::to_value(&state)?;

            if job.cancel.is_cancelled() {
                return Err(GrainError::Cancelled);
            }
            store
                .commit(projection, key, expected, &state, &metadata)
                .await?;

            if disposition == Disposition::Rebuild {
                tracing::info!(
                    projection,
                    routing_key = %key,
                    event_kind = %job.message.event_kind,
                    "grain state rebuilt"
                );
            }

            Ok(RouteOutcome::Routed {
                routing_key: key.clone(),
                disposition,
                watermark: metadata.last_occurred_at,
            })
        }
    }
}

fn log_failure(projection: &'static str, job: &Job, err: &GrainError) {
    match err {
        GrainError::UnhandledEventKind { .. } | GrainError::EventApplication { .. } => {
            metrics::counter!("grains_handler_failures_total", "projection" => projection)
                .increment(1);
            tracing::error!(
                projection,
                routing_key = %job.routing_key,
                event_kind = %job.message.event_kind,
                error = %err,
                "grain handler failed"
            );
        }
        GrainError::Cancelled => {
            tracing::debug!(projection, routing_key = %job.routing_key, "message cancelled");
        }
        err if err.is_retryable() => {
            tracing::warn!(
                projection,
                routing_key = %job.routing_key,
                error = %err,
                "grain store failure"
            );
        }
        err => {
            tracing::error!(
                projection,
                routing_key = %job.routing_key,
                error = %err,
                "grain processing failed"
            );
        }
    }
}
