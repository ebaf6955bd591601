//! Typed publish/subscribe event bus
//!
//! The bus is an explicitly constructed instance, not a global: the
//! composition root builds one and hands `Arc<EventBus>` to every consumer,
//! which keeps tests isolated and ownership obvious.
//!
//! Dispatch is settle-all: every active subscriber for a kind runs for every
//! emission, a failing handler is caught and reported, and no handler can
//! starve or crash its siblings. Chat, phase-transition, and UI-refresh
//! consumers all react to the same events and must stay mutually isolated.

use crate::errors::{CoreError, CoreResult};
use crate::events::{Event, EventKind};
use crate::identifiers::{EventId, SubscriptionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};

/// Handler invoked for every matching emission
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event; an `Err` is caught at the bus boundary
    async fn handle(&self, event: &Event) -> CoreResult<()>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> BoxFuture<'static, CoreResult<()>> + Send + Sync,
{
    async fn handle(&self, event: &Event) -> CoreResult<()> {
        (self.f)(event.clone()).await
    }
}

/// Wrap an async closure as an [`EventHandler`]
pub fn handler_fn<F>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> BoxFuture<'static, CoreResult<()>> + Send + Sync + 'static,
{
    Arc::new(FnHandler { f })
}

/// Middleware hooked around every emission
#[async_trait]
pub trait EventMiddleware: Send + Sync {
    /// Runs before dispatch; may transform the event. An `Err` is caught and
    /// logged and the previous event is kept.
    async fn before(&self, event: Event) -> CoreResult<Event> {
        Ok(event)
    }

    /// Runs unconditionally after dispatch; errors are caught and logged
    async fn after(&self, _event: &Event) -> CoreResult<()> {
        Ok(())
    }

    /// Name used in log lines
    fn name(&self) -> &str {
        "middleware"
    }
}

/// Context handed to the configurable error handler
#[derive(Debug, Clone)]
pub struct HandlerErrorContext {
    /// The failing subscription
    pub subscription_id: SubscriptionId,
    /// Kind of the event being dispatched
    pub kind: EventKind,
    /// Id of the event being dispatched
    pub event_id: EventId,
}

/// Configurable sink for handler failures
pub type ErrorHandlerFn = Arc<dyn Fn(&CoreError, &HandlerErrorContext) + Send + Sync>;

/// Options accepted by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOptions {
    /// Remove the subscription after its first successful invocation
    pub once: bool,
    /// Higher fires first; ties broken by registration order
    pub priority: i32,
}

impl SubscribeOptions {
    /// Options with a priority and `once: false`
    pub fn priority(priority: i32) -> Self {
        Self {
            once: false,
            priority,
        }
    }
}

/// Bus tuning knobs
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Per-kind listener cap
    pub max_listeners_per_kind: usize,
    /// How many processing records to retain for inspection
    pub queue_retention: usize,
    /// EWMA smoothing factor for the latency metric
    pub latency_alpha: f64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_listeners_per_kind: 100,
            queue_retention: 256,
            latency_alpha: 0.1,
        }
    }
}

struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
    once: bool,
    priority: i32,
    active: bool,
    seq: u64,
    created_at: DateTime<Utc>,
}

/// Read-only view of one registration
#[derive(Debug, Clone)]
pub struct ListenerInfo {
    /// Subscription id
    pub id: SubscriptionId,
    /// Kind subscribed to
    pub kind: EventKind,
    /// Dispatch priority
    pub priority: i32,
    /// Fire-once flag
    pub once: bool,
    /// Active flag
    pub active: bool,
    /// Registration time
    pub created_at: DateTime<Utc>,
}

/// Dispatch status of one emission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    /// Queued, not yet dispatching
    Pending,
    /// Handlers running
    Processing,
    /// All handlers settled without failure
    Completed,
    /// At least one handler failed
    Failed,
}

/// Ephemeral bookkeeping for one emission, retained briefly for inspection
#[derive(Debug, Clone)]
pub struct ProcessingRecord {
    /// The emitted event's id
    pub event_id: EventId,
    /// The emitted event's kind
    pub kind: EventKind,
    /// Dispatch status
    pub status: ProcessingStatus,
    /// When dispatch started
    pub started_at: DateTime<Utc>,
    /// When dispatch settled
    pub completed_at: Option<DateTime<Utc>>,
    /// Always 0: the bus never retries. Kept so the record shape matches
    /// consumers that expect a retry counter.
    pub retry_count: u32,
    /// Message of the last handler failure
    pub last_error: Option<String>,
}

/// Bus metrics snapshot
#[derive(Debug, Clone, Default)]
pub struct BusMetrics {
    /// Total events emitted
    pub total_events: u64,
    /// Emissions per kind
    pub events_by_kind: HashMap<EventKind, u64>,
    /// Exponentially-weighted moving average of dispatch latency
    pub avg_processing_ms: f64,
    /// Timestamp of the most recent emission
    pub last_event_at: Option<DateTime<Utc>>,
    /// Handler failures observed
    pub error_count: u64,
    /// Currently registered active listeners
    pub active_listeners: usize,
}

#[derive(Default)]
struct MetricsInner {
    total_events: u64,
    events_by_kind: HashMap<EventKind, u64>,
    ewma_ms: Option<f64>,
    last_event_at: Option<DateTime<Utc>>,
    error_count: u64,
}

/// In-process typed publish/subscribe dispatcher
pub struct EventBus {
    listeners: RwLock<HashMap<EventKind, Vec<Subscription>>>,
    middleware: RwLock<Vec<Arc<dyn EventMiddleware>>>,
    metrics: Mutex<MetricsInner>,
    queue: Mutex<Vec<ProcessingRecord>>,
    error_handler: RwLock<Option<ErrorHandlerFn>>,
    shutting_down: AtomicBool,
    next_seq: AtomicU64,
    config: BusConfig,
}

impl EventBus {
    /// Create a bus with default configuration
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    /// Create a bus with explicit configuration
    pub fn with_config(config: BusConfig) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            middleware: RwLock::new(Vec::new()),
            metrics: Mutex::new(MetricsInner::default()),
            queue: Mutex::new(Vec::new()),
            error_handler: RwLock::new(None),
            shutting_down: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
            config,
        }
    }

    /// Register a handler for one event kind
    pub async fn subscribe(
        &self,
        kind: EventKind,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> CoreResult<SubscriptionId> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(CoreError::ShutdownInProgress {
                operation: "subscribe".to_string(),
            });
        }

        let mut listeners = self.listeners.write().await;
        let entries = listeners.entry(kind).or_default();
        if entries.len() >= self.config.max_listeners_per_kind {
            return Err(CoreError::MaxListenersExceeded {
                kind: kind.to_string(),
                max: self.config.max_listeners_per_kind,
            });
        }

        let id = SubscriptionId::new();
        entries.push(Subscription {
            id,
            handler,
            once: options.once,
            priority: options.priority,
            active: true,
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    /// Register a handler that fires at most once
    pub async fn once(
        &self,
        kind: EventKind,
        handler: Arc<dyn EventHandler>,
    ) -> CoreResult<SubscriptionId> {
        self.subscribe(
            kind,
            handler,
            SubscribeOptions {
                once: true,
                priority: 0,
            },
        )
        .await
    }

    /// Remove a subscription; `false` when not found
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write().await;
        let mut found = false;
        for entries in listeners.values_mut() {
            let before = entries.len();
            entries.retain(|s| s.id != id);
            found |= entries.len() != before;
        }
        found
    }

    /// Mark a subscription active or inactive without removing it; an
    /// inactive listener keeps its registration slot and priority but is
    /// skipped at dispatch. `false` when the id is unknown.
    pub async fn set_listener_active(&self, id: SubscriptionId, active: bool) -> bool {
        let mut listeners = self.listeners.write().await;
        for entries in listeners.values_mut() {
            if let Some(subscription) = entries.iter_mut().find(|s| s.id == id) {
                subscription.active = active;
                return true;
            }
        }
        false
    }

    /// Remove every listener for one kind, or all of them
    pub async fn remove_all_listeners(&self, kind: Option<EventKind>) {
        let mut listeners = self.listeners.write().await;
        match kind {
            Some(kind) => {
                listeners.remove(&kind);
            }
            None => listeners.clear(),
        }
    }

    /// Append a middleware to the pipeline
    pub async fn add_middleware(&self, middleware: Arc<dyn EventMiddleware>) {
        self.middleware.write().await.push(middleware);
    }

    /// Install the configurable handler-failure sink
    pub async fn set_error_handler(&self, handler: ErrorHandlerFn) {
        *self.error_handler.write().await = Some(handler);
    }

    /// Emit an event to every active subscriber of its kind.
    ///
    /// During shutdown emission is a logged no-op. Middleware and handler
    /// failures are contained: each is caught, logged, and reported, and
    /// never aborts sibling handlers or the rest of the pipeline.
    pub async fn emit(&self, mut event: Event) -> CoreResult<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            debug!(kind = %event.kind(), "emit ignored, shutdown in progress");
            return Ok(());
        }

        let kind = event.kind();
        let started = Instant::now();
        {
            let mut queue = self.queue.lock().await;
            queue.push(ProcessingRecord {
                event_id: event.id,
                kind,
                status: ProcessingStatus::Pending,
                started_at: Utc::now(),
                completed_at: None,
                retry_count: 0,
                last_error: None,
            });
            let retention = self.config.queue_retention;
            if queue.len() > retention {
                let excess = queue.len() - retention;
                queue.drain(..excess);
            }
        }
        self.set_record_status(event.id, ProcessingStatus::Processing, None)
            .await;

        let middleware: Vec<Arc<dyn EventMiddleware>> =
            self.middleware.read().await.iter().cloned().collect();

        for mw in &middleware {
            match mw.before(event.clone()).await {
                Ok(transformed) => event = transformed,
                Err(err) => {
                    warn!(middleware = mw.name(), %err, "before-middleware failed, continuing");
                }
            }
        }

        // Snapshot the subscriber list so handlers can subscribe/unsubscribe
        // without deadlocking against the dispatch in flight.
        let mut targets: Vec<(SubscriptionId, Arc<dyn EventHandler>, bool, i32, u64)> = {
            let listeners = self.listeners.read().await;
            listeners
                .get(&kind)
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|s| s.active)
                        .map(|s| (s.id, s.handler.clone(), s.once, s.priority, s.seq))
                        .collect()
                })
                .unwrap_or_default()
        };
        targets.sort_by(|a, b| b.3.cmp(&a.3).then(a.4.cmp(&b.4)));

        let settlements = join_all(targets.iter().map(|(_, handler, _, _, _)| {
            let handler = handler.clone();
            let event = event.clone();
            async move { handler.handle(&event).await }
        }))
        .await;

        let mut last_error: Option<String> = None;
        let mut fired_once: Vec<SubscriptionId> = Vec::new();
        let error_handler = self.error_handler.read().await.clone();
        for ((subscription_id, _, once, _, _), result) in targets.iter().zip(settlements) {
            match result {
                Ok(()) => {
                    if *once {
                        fired_once.push(*subscription_id);
                    }
                }
                Err(err) => {
                    error!(
                        subscription = %subscription_id,
                        kind = %kind,
                        %err,
                        "handler failed; siblings unaffected"
                    );
                    last_error = Some(err.to_string());
                    let mut metrics = self.metrics.lock().await;
                    metrics.error_count += 1;
                    drop(metrics);
                    if let Some(ref error_handler) = error_handler {
                        error_handler(
                            &err,
                            &HandlerErrorContext {
                                subscription_id: *subscription_id,
                                kind,
                                event_id: event.id,
                            },
                        );
                    }
                }
            }
        }

        if !fired_once.is_empty() {
            let mut listeners = self.listeners.write().await;
            if let Some(entries) = listeners.get_mut(&kind) {
                entries.retain(|s| !fired_once.contains(&s.id));
            }
        }

        for mw in &middleware {
            if let Err(err) = mw.after(&event).await {
                warn!(middleware = mw.name(), %err, "after-middleware failed");
            }
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        {
            let mut metrics = self.metrics.lock().await;
            metrics.total_events += 1;
            *metrics.events_by_kind.entry(kind).or_insert(0) += 1;
            metrics.last_event_at = Some(Utc::now());
            metrics.ewma_ms = Some(match metrics.ewma_ms {
                None => elapsed_ms,
                Some(previous) => previous + self.config.latency_alpha * (elapsed_ms - previous),
            });
        }

        let status = if last_error.is_some() {
            ProcessingStatus::Failed
        } else {
            ProcessingStatus::Completed
        };
        self.set_record_status(event.id, status, last_error).await;

        Ok(())
    }

    async fn set_record_status(
        &self,
        event_id: EventId,
        status: ProcessingStatus,
        last_error: Option<String>,
    ) {
        let mut queue = self.queue.lock().await;
        if let Some(record) = queue.iter_mut().rev().find(|r| r.event_id == event_id) {
            record.status = status;
            if matches!(status, ProcessingStatus::Completed | ProcessingStatus::Failed) {
                record.completed_at = Some(Utc::now());
            }
            if last_error.is_some() {
                record.last_error = last_error;
            }
        }
    }

    /// Subscribe as a buffered stream of events; a full buffer drops events
    /// rather than blocking dispatch
    pub async fn event_stream(
        &self,
        kind: EventKind,
        buffer: usize,
    ) -> CoreResult<(SubscriptionId, ReceiverStream<Event>)> {
        let (tx, rx) = mpsc::channel(buffer);
        let id = self
            .subscribe(
                kind,
                handler_fn(move |event| {
                    let tx = tx.clone();
                    Box::pin(async move {
                        let _ = tx.try_send(event);
                        Ok(())
                    })
                }),
                SubscribeOptions::default(),
            )
            .await?;
        Ok((id, ReceiverStream::new(rx)))
    }

    /// Metrics snapshot
    pub async fn metrics(&self) -> BusMetrics {
        let inner = self.metrics.lock().await;
        let active_listeners = {
            let listeners = self.listeners.read().await;
            listeners
                .values()
                .map(|entries| entries.iter().filter(|s| s.active).count())
                .sum()
        };
        BusMetrics {
            total_events: inner.total_events,
            events_by_kind: inner.events_by_kind.clone(),
            avg_processing_ms: inner.ewma_ms.unwrap_or(0.0),
            last_event_at: inner.last_event_at,
            error_count: inner.error_count,
            active_listeners,
        }
    }

    /// Read-only view of every registration
    pub async fn active_listeners(&self) -> Vec<ListenerInfo> {
        let listeners = self.listeners.read().await;
        let mut out = Vec::new();
        for (kind, entries) in listeners.iter() {
            for s in entries {
                out.push(ListenerInfo {
                    id: s.id,
                    kind: *kind,
                    priority: s.priority,
                    once: s.once,
                    active: s.active,
                    created_at: s.created_at,
                });
            }
        }
        out
    }

    /// Retained processing records, newest last
    pub async fn processing_queue(&self) -> Vec<ProcessingRecord> {
        self.queue.lock().await.clone()
    }

    /// Whether shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Begin shutdown: block further subscribe/emit, clear listeners, drain
    /// the record queue. Idempotent; in-flight handlers are not aborted.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let in_flight = {
            let queue = self.queue.lock().await;
            queue
                .iter()
                .filter(|r| {
                    matches!(
                        r.status,
                        ProcessingStatus::Pending | ProcessingStatus::Processing
                    )
                })
                .count()
        };
        if in_flight > 0 {
            debug!(in_flight, "shutdown: waiting for in-flight events to settle");
        }
        self.listeners.write().await.clear();
        self.queue.lock().await.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
