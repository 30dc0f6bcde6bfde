//! Worker pool executor: bounded concurrency, per-task deadlines, and
//! cooperative cancellation.
//!
//! A fixed set of runner tasks drains one bounded queue. Submission never
//! waits on a full queue; overflow is rejected with `Overloaded` so memory
//! stays bounded under load. Workers buffer their output and hand it back
//! through the executor; nothing reaches the knowledge store from inside a
//! worker, so a cancelled execution can never leave a partial write behind.
//!
//! The invocation boundary is the second capability enforcement point: the
//! runner re-checks the task's required operations against the allowance it
//! was routed with before the worker runs (defense against a stale lookup).

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::shared::{OperationSet, Task};

/// Cooperative cancellation handle shared between the scheduler, the
/// executor, and the running worker. Workers poll `is_cancelled` between
/// steps; the executor also selects on `cancelled()` to detach promptly.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the token. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Resolves once the token is tripped.
    pub async fn cancelled(&self) {
        loop {
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// What the executor hands across the worker boundary: the task snapshot
/// plus the operation allowance it was routed under. The worker may only
/// act within that allowance.
#[derive(Debug, Clone)]
pub struct WorkerInvocation {
    pub task: Task,
    pub allowance: OperationSet,
}

/// Buffered output of a clean worker run. Committed to the knowledge store
/// by the scheduler, never by the worker itself.
#[derive(Debug, Clone)]
pub struct WorkerOutput {
    /// Existing document to update, or `None` to create a new one.
    pub doc_id: Option<Uuid>,
    /// Version the update is based on; ignored for creates.
    pub base_version: u64,
    pub topic: String,
    pub tags: BTreeSet<String>,
    pub body: String,
    pub diff_summary: String,
}

impl WorkerOutput {
    /// Output that creates a new document.
    pub fn new_document(
        topic: impl Into<String>,
        tags: BTreeSet<String>,
        body: impl Into<String>,
        diff_summary: impl Into<String>,
    ) -> Self {
        Self {
            doc_id: None,
            base_version: 0,
            topic: topic.into(),
            tags,
            body: body.into(),
            diff_summary: diff_summary.into(),
        }
    }
}

/// A worker type bound to one capability profile.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Id of the capability profile this worker executes under.
    fn profile_id(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Runs the task. Implementations must observe `cancel` between steps
    /// and return promptly once it trips; buffered work is discarded by the
    /// caller in that case.
    async fn execute(
        &self,
        invocation: &WorkerInvocation,
        cancel: &CancelToken,
    ) -> Result<WorkerOutput, Box<dyn std::error::Error + Send + Sync>>;
}

/// Lookup table from capability profile id to the worker implementing it.
#[derive(Clone, Default)]
pub struct WorkerSet {
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl WorkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a worker under its profile id. Last registration wins.
    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.profile_id().to_string(), worker);
    }

    pub fn get(&self, profile_id: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(profile_id).cloned()
    }

    pub fn profile_ids(&self) -> Vec<String> {
        self.workers.keys().cloned().collect()
    }
}

/// Why an execution produced no committable output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecFailure {
    /// Deadline elapsed or the token was tripped; the task is cancelled and
    /// any buffered output discarded.
    Cancelled,
    /// Invocation-time privilege re-check failed.
    PrivilegeViolation,
    /// The worker returned an error.
    Worker(String),
}

struct PoolJob {
    invocation: WorkerInvocation,
    worker: Arc<dyn Worker>,
    cancel: CancelToken,
    deadline: DateTime<Utc>,
    respond: oneshot::Sender<Result<WorkerOutput, ExecFailure>>,
}

/// Fixed-size execution pool over a bounded queue.
pub struct WorkerPool {
    queue_tx: mpsc::Sender<PoolJob>,
    queue_bound: usize,
}

impl WorkerPool {
    /// Spawns `pool_size` runner tasks sharing one queue of depth
    /// `queue_bound`.
    pub fn new(pool_size: usize, queue_bound: usize) -> Self {
        let pool_size = pool_size.max(1);
        let queue_bound = queue_bound.max(1);
        let (queue_tx, queue_rx) = mpsc::channel::<PoolJob>(queue_bound);
        let shared_rx = Arc::new(Mutex::new(queue_rx));

        for slot in 0..pool_size {
            let rx = Arc::clone(&shared_rx);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(job) => run_job(slot, job).await,
                        None => break,
                    }
                }
            });
        }

        Self {
            queue_tx,
            queue_bound,
        }
    }

    /// Enqueues an execution. Returns a receiver that resolves when the run
    /// finishes, or `Overloaded` immediately when the queue is full.
    pub fn submit(
        &self,
        invocation: WorkerInvocation,
        worker: Arc<dyn Worker>,
        cancel: CancelToken,
        deadline: DateTime<Utc>,
    ) -> Result<oneshot::Receiver<Result<WorkerOutput, ExecFailure>>, CoreError> {
        let (respond, receiver) = oneshot::channel();
        let job = PoolJob {
            invocation,
            worker,
            cancel,
            deadline,
            respond,
        };
        self.queue_tx.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) | mpsc::error::TrySendError::Closed(_) => {
                CoreError::Overloaded {
                    queue_bound: self.queue_bound,
                }
            }
        })?;
        Ok(receiver)
    }
}

async fn run_job(slot: usize, job: PoolJob) {
    let result = execute_job(slot, &job).await;
    // A dropped receiver means the submitter gave up; nothing to report to.
    let _ = job.respond.send(result);
}

async fn execute_job(slot: usize, job: &PoolJob) -> Result<WorkerOutput, ExecFailure> {
    let task = &job.invocation.task;

    // Second least-privilege check, at the invocation boundary.
    if !task.required_operations.is_subset_of(job.invocation.allowance) {
        warn!(
            task_id = %task.id,
            required = %task.required_operations,
            allowance = %job.invocation.allowance,
            "invocation-time privilege check failed"
        );
        return Err(ExecFailure::PrivilegeViolation);
    }

    let remaining = job.deadline - Utc::now();
    let Ok(budget) = remaining.to_std() else {
        // Deadline already passed while queued.
        job.cancel.cancel();
        return Err(ExecFailure::Cancelled);
    };

    debug!(slot, task_id = %task.id, worker = job.worker.profile_id(), "execution started");

    let outcome = tokio::select! {
        result = tokio::time::timeout(budget, job.worker.execute(&job.invocation, &job.cancel)) => result,
        _ = job.cancel.cancelled() => {
            // Explicit cancellation: the worker future is dropped here,
            // detaching it from the result path.
            return Err(ExecFailure::Cancelled);
        }
    };

    match outcome {
        Err(_elapsed) => {
            job.cancel.cancel();
            debug!(task_id = %task.id, "deadline elapsed, execution cancelled");
            Err(ExecFailure::Cancelled)
        }
        Ok(_) if job.cancel.is_cancelled() => {
            // The worker finished after the token tripped; its buffered
            // output is discarded, never committed.
            Err(ExecFailure::Cancelled)
        }
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => Err(ExecFailure::Worker(err.to_string())),
    }
}
