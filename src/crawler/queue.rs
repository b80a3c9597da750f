//! Priority work queue with a fixed-size worker pool
//!
//! This module handles:
//! - Ordering pending tasks by priority (lower value first, FIFO on ties)
//! - Dispatching tasks to at most `max_concurrency` workers
//! - Quiescence detection (`on_idle`) without a known total
//! - Abort via `end`, which drops pending work and lets in-flight work finish

use crate::render::WaitUntil;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use url::Url;

/// Per-task options carried alongside the URL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOptions {
    /// Link distance from the seed this task was discovered from
    pub depth: u32,

    /// Overrides the configured navigation timeout
    pub timeout: Option<Duration>,

    /// Overrides the configured wait condition
    pub wait_until: Option<WaitUntil>,
}

impl TaskOptions {
    /// Options for a link discovered on a page loaded with `self`
    pub fn child(&self) -> Self {
        Self {
            depth: self.depth + 1,
            ..Self::default()
        }
    }
}

/// A unit of scheduled work
#[derive(Debug, Clone)]
pub struct Task {
    /// The URL to visit
    pub url: Url,

    pub options: TaskOptions,

    /// Priority value (lower is more urgent)
    pub priority: i32,

    /// Number of times this task has been dispatched
    pub attempt: u32,

    /// Insertion sequence number, breaks priority ties
    seq: u64,
}

// BinaryHeap is a max-heap: the "greatest" task is the one with the lowest
// priority value, then the lowest sequence number
impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Task {}

/// Runs one task to completion
///
/// The queue counts the task as in flight until `handle` returns. A handler
/// that never returns stalls `on_idle`, so handlers must bound their own
/// work with timeouts.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// `previous` is the URL this worker handled before, if any
    async fn handle(&self, task: Task, previous: Option<Url>);

    /// Called when `handle` panicked; the worker keeps running
    fn on_panic(&self, _url: &Url, _message: &str) {}
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: BinaryHeap<Task>,
    in_flight: usize,
    peak_in_flight: usize,
    next_seq: u64,
    ended: bool,
    started: bool,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight == 0
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    max_concurrency: usize,
    /// Signalled when a task is pushed or the queue ends
    work_ready: Notify,
    /// Signalled when the queue reaches quiescence
    idle: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A panicking handler never holds this lock, so the state stays consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Waits for the next task; `None` once the queue has ended
    async fn next_task(&self) -> Option<Task> {
        loop {
            let notified = self.work_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.ended {
                    return None;
                }

                if state.in_flight < self.max_concurrency {
                    if let Some(mut task) = state.pending.pop() {
                        state.in_flight += 1;
                        state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
                        task.attempt += 1;
                        return Some(task);
                    }
                }
            }

            notified.await;
        }
    }

    fn complete(&self) {
        let idle = {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.is_idle()
        };

        if idle {
            self.idle.notify_waiters();
        }
    }
}

/// Marks a dispatched task as finished even if its handler panics
struct InFlightGuard<'a>(&'a Shared);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.complete();
    }
}

/// Priority work queue shared between the orchestrator and its workers
///
/// Cloning is cheap; all clones refer to the same queue.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    shared: Arc<Shared>,
}

impl WorkQueue {
    /// Creates a queue that runs at most `max_concurrency` tasks at once
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                max_concurrency: max_concurrency.max(1),
                work_ready: Notify::new(),
                idle: Notify::new(),
            }),
        }
    }

    /// Adds a task to the queue
    ///
    /// Deduplication is the caller's job (see `VisitedLedger::try_claim`).
    ///
    /// # Returns
    ///
    /// * `true` - The task was queued
    /// * `false` - The queue has ended; the task was dropped
    pub fn push(&self, url: Url, options: TaskOptions, priority: i32) -> bool {
        {
            let mut state = self.shared.lock();
            if state.ended {
                tracing::debug!("Queue ended, dropping {}", url);
                return false;
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push(Task {
                url,
                options,
                priority,
                attempt: 0,
                seq,
            });
        }

        self.shared.work_ready.notify_one();
        true
    }

    /// Spawns the worker pool
    ///
    /// Each worker pulls one task at a time and runs the handler to
    /// completion before pulling the next. A panicking handler costs only
    /// its task. Workers exit once the queue ends.
    /// Calling `start` more than once has no effect.
    pub fn start<H: TaskHandler>(&self, handler: Arc<H>) -> Vec<JoinHandle<()>> {
        {
            let mut state = self.shared.lock();
            if state.started {
                tracing::warn!("Work queue already started");
                return Vec::new();
            }
            state.started = true;
        }

        (0..self.shared.max_concurrency)
            .map(|worker_id| {
                let shared = self.shared.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    let mut previous: Option<Url> = None;

                    while let Some(task) = shared.next_task().await {
                        let _guard = InFlightGuard(&shared);
                        let url = task.url.clone();
                        tracing::trace!("Worker {} picked up {}", worker_id, url);

                        let outcome = AssertUnwindSafe(handler.handle(task, previous.take()))
                            .catch_unwind()
                            .await;
                        if let Err(payload) = outcome {
                            let message = panic_message(&*payload);
                            tracing::error!("Worker {} panicked on {}: {}", worker_id, url, message);
                            handler.on_panic(&url, &message);
                        }
                        previous = Some(url);
                    }

                    tracing::trace!("Worker {} exiting", worker_id);
                })
            })
            .collect()
    }

    /// Resolves once nothing is pending and nothing is in flight
    ///
    /// Quiescence is re-checked after every task completion, so work pushed
    /// while waiting keeps this pending until that work is done too.
    pub async fn on_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared.lock().is_idle() {
                return;
            }

            notified.await;
        }
    }

    /// Stops dispatching and discards pending tasks
    ///
    /// Tasks already running finish normally. Later pushes are ignored.
    pub fn end(&self) {
        let (dropped, idle) = {
            let mut state = self.shared.lock();
            state.ended = true;
            let dropped = state.pending.len();
            state.pending.clear();
            (dropped, state.is_idle())
        };

        if dropped > 0 {
            tracing::info!("Queue ended with {} pending tasks discarded", dropped);
        }

        self.shared.work_ready.notify_waiters();
        if idle {
            self.shared.idle.notify_waiters();
        }
    }

    /// Number of tasks waiting to be dispatched
    pub fn pending_len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Number of tasks currently running
    pub fn in_flight(&self) -> usize {
        self.shared.lock().in_flight
    }

    /// Highest number of tasks that ran at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.shared.lock().peak_in_flight
    }

    pub fn is_ended(&self) -> bool {
        self.shared.lock().ended
    }

    pub fn is_idle(&self) -> bool {
        self.shared.lock().is_idle()
    }
}
