//! Priority background task queue with retry, backoff, and
//! at-least-once execution.
//!
//! Tasks are ordered by (priority desc, next-run asc, enqueue-seq asc)
//! in a single heap behind one mutex; a fixed pool of workers blocks on
//! a [`Notify`] when nothing is ready. Failed attempts reschedule with
//! exponential backoff plus jitter until `max_attempts`, after which the
//! task moves to `dead` and a dead-letter event is emitted.
//!
//! Execution is **at-least-once**: a worker crash between execution and
//! commit may re-execute a task, so handler payloads must be idempotent.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use openpredict_types::{OpenpredictError, Result, TaskId, TaskQueueConfig};

/// Backstop on queued tasks; enqueue past this is rejected.
const MAX_QUEUED: usize = 100_000;

/// Task priority levels, lowest to highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl TaskPriority {
    pub const ALL: [Self; 4] = [Self::Low, Self::Normal, Self::High, Self::Critical];
}

/// Task execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Done,
    Failed,
    Dead,
    Cancelled,
}

/// A queued unit of work: a named handler plus a JSON payload.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub handler: String,
    pub payload: serde_json::Value,
    pub priority: TaskPriority,
    pub attempts: u32,
    pub max_attempts: u32,
}

/// Handler registered by name; must tolerate re-execution.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, payload: &serde_json::Value) -> Result<()>;
}

/// Emitted when a task exhausts its attempts.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub task_id: TaskId,
    pub handler: String,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Counts by status and queued counts by priority.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskQueueStats {
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub dead: usize,
    pub cancelled: usize,
    pub queued_by_priority: HashMap<TaskPriority, usize>,
}

struct QueuedTask {
    next_run: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}
impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    /// Max-heap order: priority desc, then next-run asc, then seq asc.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.next_run.cmp(&self.next_run))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueInner {
    heap: BinaryHeap<QueuedTask>,
    statuses: HashMap<TaskId, TaskStatus>,
    seq: u64,
}

enum NextStep {
    Run(Task),
    WaitUntil(Instant),
    Idle,
}

/// The queue. Share via `Arc`; call [`TaskQueue::start_workers`] once.
pub struct TaskQueue {
    config: TaskQueueConfig,
    inner: Mutex<QueueInner>,
    notify: Notify,
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
    dead_tx: broadcast::Sender<DeadLetter>,
    shutdown: AtomicBool,
}

impl TaskQueue {
    #[must_use]
    pub fn new(config: TaskQueueConfig) -> Arc<Self> {
        let (dead_tx, _) = broadcast::channel(1_024);
        Arc::new(Self {
            config,
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            handlers: RwLock::new(HashMap::new()),
            dead_tx,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Register (or replace) the handler for a task name.
    pub fn register_handler(&self, name: &str, handler: Arc<dyn TaskHandler>) {
        debug!(handler = name, "task handler registered");
        self.handlers.write().insert(name.to_string(), handler);
    }

    /// Dead-letter stream.
    #[must_use]
    pub fn subscribe_dead_letters(&self) -> broadcast::Receiver<DeadLetter> {
        self.dead_tx.subscribe()
    }

    /// Enqueue a task for its registered handler.
    ///
    /// # Errors
    /// `UnknownHandler` for an unregistered name, `QueueFull` past the
    /// backstop.
    pub fn enqueue(
        &self,
        handler: &str,
        payload: serde_json::Value,
        priority: TaskPriority,
    ) -> Result<TaskId> {
        if !self.handlers.read().contains_key(handler) {
            return Err(OpenpredictError::UnknownHandler {
                name: handler.to_string(),
            });
        }
        let task = Task {
            id: TaskId::new(),
            handler: handler.to_string(),
            payload,
            priority,
            attempts: 0,
            max_attempts: self.config.max_attempts.max(1),
        };
        let id = task.id;
        {
            let mut inner = self.inner.lock();
            if inner.heap.len() >= MAX_QUEUED {
                return Err(OpenpredictError::QueueFull);
            }
            inner.seq += 1;
            let seq = inner.seq;
            inner.statuses.insert(id, TaskStatus::Queued);
            inner.heap.push(QueuedTask {
                next_run: Instant::now(),
                seq,
                task,
            });
        }
        self.notify.notify_one();
        Ok(id)
    }

    /// Cancel a task that hasn't started running yet.
    ///
    /// # Errors
    /// `TaskNotCancellable` once the task left the queued state.
    pub fn cancel(&self, task_id: TaskId) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.statuses.get(&task_id) {
            Some(TaskStatus::Queued) => {
                inner.statuses.insert(task_id, TaskStatus::Cancelled);
                Ok(())
            }
            _ => Err(OpenpredictError::TaskNotCancellable(task_id)),
        }
    }

    /// Status of a known task.
    #[must_use]
    pub fn status(&self, task_id: TaskId) -> Option<TaskStatus> {
        self.inner.lock().statuses.get(&task_id).copied()
    }

    /// Counts by status and queued depth per priority.
    #[must_use]
    pub fn stats(&self) -> TaskQueueStats {
        let inner = self.inner.lock();
        let mut stats = TaskQueueStats::default();
        for priority in TaskPriority::ALL {
            stats.queued_by_priority.insert(priority, 0);
        }
        for status in inner.statuses.values() {
            match status {
                TaskStatus::Queued | TaskStatus::Failed => stats.queued += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Done => stats.done += 1,
                TaskStatus::Dead => stats.dead += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        for queued in &inner.heap {
            if matches!(
                inner.statuses.get(&queued.task.id),
                Some(TaskStatus::Queued | TaskStatus::Failed)
            ) {
                *stats
                    .queued_by_priority
                    .entry(queued.task.priority)
                    .or_insert(0) += 1;
            }
        }
        stats
    }

    /// Spawn the worker pool. Call once; returns the worker handles.
    pub fn start_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let count = self.config.workers.max(1);
        info!(workers = count, "task queue workers starting");
        (0..count)
            .map(|worker| {
                let queue = self.clone();
                tokio::spawn(async move {
                    queue.worker_loop(worker).await;
                })
            })
            .collect()
    }

    /// Stop the workers after their current task.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    async fn worker_loop(&self, worker: usize) {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!(worker, "worker shutting down");
                return;
            }
            match self.next_step() {
                NextStep::Run(task) => self.execute(task).await,
                NextStep::WaitUntil(when) => {
                    let sleep = tokio::time::sleep_until(when.into());
                    tokio::select! {
                        () = sleep => {}
                        () = self.notify.notified() => {}
                    }
                }
                NextStep::Idle => self.notify.notified().await,
            }
        }
    }

    fn next_step(&self) -> NextStep {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        loop {
            let Some(top) = inner.heap.peek() else {
                return NextStep::Idle;
            };
            // Lazily drop cancelled entries.
            if matches!(
                inner.statuses.get(&top.task.id),
                Some(TaskStatus::Cancelled)
            ) {
                inner.heap.pop();
                continue;
            }
            if top.next_run > now {
                return NextStep::WaitUntil(top.next_run);
            }
            let queued = inner.heap.pop().expect("peeked entry exists");
            inner.statuses.insert(queued.task.id, TaskStatus::Running);
            return NextStep::Run(queued.task);
        }
    }

    async fn execute(&self, mut task: Task) {
        let handler = self.handlers.read().get(&task.handler).cloned();
        task.attempts += 1;

        let outcome = match handler {
            Some(handler) => handler.run(&task.payload).await,
            None => Err(OpenpredictError::UnknownHandler {
                name: task.handler.clone(),
            }),
        };

        match outcome {
            Ok(()) => {
                debug!(task = %task.id, handler = task.handler, attempts = task.attempts, "task done");
                self.inner.lock().statuses.insert(task.id, TaskStatus::Done);
            }
            Err(err) if task.attempts < task.max_attempts && err.is_retriable() => {
                let delay = self.backoff_delay(task.attempts);
                warn!(
                    task = %task.id,
                    handler = task.handler,
                    attempts = task.attempts,
                    delay_ms = delay.as_millis() as u64,
                    %err,
                    "task failed, retrying"
                );
                let mut inner = self.inner.lock();
                inner.seq += 1;
                let seq = inner.seq;
                inner.statuses.insert(task.id, TaskStatus::Failed);
                inner.heap.push(QueuedTask {
                    next_run: Instant::now() + delay,
                    seq,
                    task,
                });
                drop(inner);
                self.notify.notify_one();
            }
            Err(err) => {
                error!(
                    task = %task.id,
                    handler = task.handler,
                    attempts = task.attempts,
                    %err,
                    "task dead-lettered"
                );
                self.inner.lock().statuses.insert(task.id, TaskStatus::Dead);
                let _ = self.dead_tx.send(DeadLetter {
                    task_id: task.id,
                    handler: task.handler,
                    payload: task.payload,
                    attempts: task.attempts,
                    error: err.to_string(),
                    at: Utc::now(),
                });
            }
        }
    }

    /// Exponential backoff with jitter: `base * factor^(attempt-1)`,
    /// capped, then scaled by a random factor in `[0.5, 1.0)`.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let backoff = &self.config.backoff;
        let exp = attempt.saturating_sub(1).min(16);
        let raw = backoff
            .base_ms
            .saturating_mul(u64::from(backoff.factor.max(1)).saturating_pow(exp));
        let capped = raw.min(backoff.cap_ms);
        if backoff.jitter {
            let factor = rand::thread_rng().gen_range(0.5..1.0);
            Duration::from_millis((capped as f64 * factor) as u64)
        } else {
            Duration::from_millis(capped)
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
