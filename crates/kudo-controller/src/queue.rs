//! Typed, keyed, deduplicating work queue.
//!
//! Events for the same key coalesce: enqueueing while an item waits
//! replaces the waiting event, and enqueueing while an item is in flight
//! causes exactly one re-process after the in-flight one completes. Events
//! for the same key are processed serially; distinct keys run in parallel
//! up to the worker count.
//!
//! The queue is also the only retry mechanism: transient handler errors
//! re-enqueue with exponential back-off, and a handler can ask to be woken
//! again after a delay by returning a resync hint.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use kudo_api::Escalation;

/// Objects processable by the queue are addressed by a stable key.
pub trait Keyed {
    /// The coalescing key; events with equal keys collapse.
    fn key(&self) -> String;
}

impl Keyed for Escalation {
    fn key(&self) -> String {
        self.metadata.name.clone()
    }
}

/// A mutation event observed on the external store.
#[derive(Debug)]
pub enum Event<T> {
    /// The object was created, or re-listed after a cache resync.
    Add(Arc<T>),
    /// The object changed.
    Update {
        /// State before the change.
        old: Arc<T>,
        /// State after the change.
        new: Arc<T>,
    },
    /// The object was removed from the store.
    Delete(Arc<T>),
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        match self {
            Event::Add(obj) => Event::Add(obj.clone()),
            Event::Update { old, new } => Event::Update {
                old: old.clone(),
                new: new.clone(),
            },
            Event::Delete(obj) => Event::Delete(obj.clone()),
        }
    }
}

impl<T: Keyed> Event<T> {
    fn key(&self) -> String {
        match self {
            Event::Add(obj) | Event::Delete(obj) => obj.key(),
            Event::Update { new, .. } => new.key(),
        }
    }
}

/// What the handler wants to happen next for the object it just processed.
#[derive(Debug)]
pub struct EventInsight<T> {
    /// Re-deliver an update for `object` after this delay.
    pub resync_after: Option<Duration>,
    /// The object to re-deliver. Required when `resync_after` is set.
    pub object: Option<Arc<T>>,
}

impl<T> EventInsight<T> {
    /// Nothing to schedule.
    pub fn none() -> Self {
        EventInsight {
            resync_after: None,
            object: None,
        }
    }

    /// Revisit `object` after `delay`.
    pub fn resync_after(delay: Duration, object: Arc<T>) -> Self {
        EventInsight {
            resync_after: Some(delay),
            object: Some(object),
        }
    }
}

impl<T> Default for EventInsight<T> {
    fn default() -> Self {
        EventInsight::none()
    }
}

/// Failure of an event handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Retrying may succeed; the queue re-enqueues with back-off.
    #[error("transient error: {0}")]
    Transient(String),

    /// Retrying will not help; the event is logged and dropped. The next
    /// cache resync re-delivers the object if it still matters.
    #[error("{0}")]
    Terminal(String),
}

impl HandlerError {
    /// Whether the queue should retry this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, HandlerError::Transient(_))
    }
}

impl From<kudo_api::StoreError> for HandlerError {
    fn from(err: kudo_api::StoreError) -> Self {
        if err.is_retryable() {
            HandlerError::Transient(err.to_string())
        } else {
            HandlerError::Terminal(err.to_string())
        }
    }
}

/// Consumer of store mutation events.
#[async_trait]
pub trait EventHandler<T: Send + Sync>: Send + Sync {
    /// The object appeared.
    async fn on_add(&self, object: Arc<T>) -> Result<EventInsight<T>, HandlerError>;

    /// The object changed.
    async fn on_update(&self, old: Arc<T>, new: Arc<T>)
        -> Result<EventInsight<T>, HandlerError>;

    /// The object disappeared.
    async fn on_delete(&self, object: Arc<T>) -> Result<EventInsight<T>, HandlerError>;
}

/// Per-key exponential back-off for transient failures.
struct Backoff {
    base: Duration,
    cap: Duration,
    attempts: Mutex<HashMap<String, u32>>,
}

impl Backoff {
    fn new(base: Duration, cap: Duration) -> Self {
        Backoff {
            base,
            cap,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn next_delay(&self, key: &str) -> Duration {
        let mut attempts = self.attempts.lock().unwrap();
        let n = attempts.entry(key.to_string()).or_insert(0);
        *n += 1;

        let factor = 2u32.saturating_pow(n.saturating_sub(1).min(31));
        self.base.saturating_mul(factor).min(self.cap)
    }

    fn forget(&self, key: &str) {
        self.attempts.lock().unwrap().remove(key);
    }
}

struct QueueState<T> {
    order: VecDeque<String>,
    queued: HashSet<String>,
    pending: HashMap<String, Event<T>>,
    active: HashSet<String>,
}

impl<T> Default for QueueState<T> {
    fn default() -> Self {
        QueueState {
            order: VecDeque::new(),
            queued: HashSet::new(),
            pending: HashMap::new(),
            active: HashSet::new(),
        }
    }
}

/// Work-queue runner feeding an [`EventHandler`] with N parallel workers.
pub struct QueuedEventHandler<T> {
    name: String,
    handler: Arc<dyn EventHandler<T>>,
    state: Mutex<QueueState<T>>,
    wakeup: Notify,
    backoff: Backoff,
    shut_down: AtomicBool,
}

impl<T> QueuedEventHandler<T>
where
    T: Keyed + Send + Sync + 'static,
{
    /// Default back-off floor for transient failures.
    pub const BACKOFF_BASE: Duration = Duration::from_millis(5);

    /// Default back-off ceiling for transient failures.
    pub const BACKOFF_CAP: Duration = Duration::from_secs(1000);

    /// Build a queue feeding `handler`, labeled `name` in logs.
    pub fn new(handler: Arc<dyn EventHandler<T>>, name: impl Into<String>) -> Arc<Self> {
        Arc::new(QueuedEventHandler {
            name: name.into(),
            handler,
            state: Mutex::new(QueueState::default()),
            wakeup: Notify::new(),
            backoff: Backoff::new(Self::BACKOFF_BASE, Self::BACKOFF_CAP),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Enqueue an event, coalescing with any waiting event for the key.
    pub fn enqueue(&self, event: Event<T>) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }

        let key = event.key();

        {
            let mut state = self.state.lock().unwrap();
            state.pending.insert(key.clone(), event);

            if !state.active.contains(&key) && state.queued.insert(key.clone()) {
                state.order.push_back(key);
            }
        }

        self.wakeup.notify_waiters();
    }

    /// Enqueue an event after a delay, unless the queue shuts down first.
    pub fn enqueue_after(self: &Arc<Self>, event: Event<T>, delay: Duration) {
        let queue = Arc::clone(self);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(event);
        });
    }

    /// Run `workers` parallel workers until [`QueuedEventHandler::shutdown`]
    /// is called. Each reconcile runs on its own task, so a panicking
    /// handler costs one event, not a worker.
    pub async fn run(self: Arc<Self>, workers: usize) {
        info!(name = %self.name, total = workers, "starting workers for handler");

        let mut tasks = JoinSet::new();
        for worker in 0..workers {
            let queue = Arc::clone(&self);
            tasks.spawn(async move { queue.run_worker(worker).await });
        }

        while tasks.join_next().await.is_some() {}

        info!(name = %self.name, "workers stopped");
    }

    /// Stop accepting events and wind the workers down.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        self.wakeup.notify_waiters();
    }

    async fn run_worker(self: Arc<Self>, worker: usize) {
        while let Some((key, event)) = self.next_item().await {
            self.process(&key, event, worker).await;

            let requeue = {
                let mut state = self.state.lock().unwrap();
                state.active.remove(&key);

                // An event arrived while this key was in flight: exactly
                // one re-process.
                if state.pending.contains_key(&key) && state.queued.insert(key.clone()) {
                    state.order.push_back(key);
                    true
                } else {
                    false
                }
            };

            if requeue {
                self.wakeup.notify_waiters();
            }
        }
    }

    async fn next_item(&self) -> Option<(String, Event<T>)> {
        loop {
            // Register interest before checking state so an enqueue racing
            // with the check still wakes us.
            let notified = self.wakeup.notified();

            if self.shut_down.load(Ordering::Acquire) {
                return None;
            }

            {
                let mut state = self.state.lock().unwrap();
                if let Some(key) = state.order.pop_front() {
                    state.queued.remove(&key);
                    if let Some(event) = state.pending.remove(&key) {
                        state.active.insert(key.clone());
                        return Some((key, event));
                    }
                    continue;
                }
            }

            notified.await;
        }
    }

    async fn process(self: &Arc<Self>, key: &str, event: Event<T>, worker: usize) {
        let handler = Arc::clone(&self.handler);
        let task_event = event.clone();

        let joined = tokio::spawn(async move {
            match task_event {
                Event::Add(obj) => handler.on_add(obj).await,
                Event::Update { old, new } => handler.on_update(old, new).await,
                Event::Delete(obj) => handler.on_delete(obj).await,
            }
        })
        .await;

        match joined {
            Ok(Ok(insight)) => {
                self.backoff.forget(key);

                if let (Some(delay), Some(object)) = (insight.resync_after, insight.object) {
                    self.enqueue_after(
                        Event::Update {
                            old: Arc::clone(&object),
                            new: object,
                        },
                        delay,
                    );
                }
            }
            Ok(Err(err)) if err.is_transient() => {
                let delay = self.backoff.next_delay(key);
                warn!(
                    name = %self.name,
                    key,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "handler reported a transient error, requeuing",
                );
                self.enqueue_after(event, delay);
            }
            Ok(Err(err)) => {
                self.backoff.forget(key);
                error!(name = %self.name, key, error = %err, "handler reported an error");
            }
            Err(join_err) => {
                self.backoff.forget(key);
                if join_err.is_panic() {
                    error!(
                        name = %self.name,
                        key,
                        worker,
                        "recovered panic from handler, dropping event",
                    );
                } else {
                    error!(name = %self.name, key, worker, "handler task was cancelled");
                }
            }
        }
    }
}
