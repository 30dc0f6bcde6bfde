//! Scheduler/router: turns submitted requests into completed tasks.
//!
//! Per-task state machine:
//! `Queued -> Completed` (coverage hit, no dispatch), or
//! `Queued -> Assigned -> Running -> Completed | Failed | Cancelled`.
//!
//! The router consults the knowledge store before dispatching so that, per
//! topic and freshness window, at most one live research task runs unless
//! the prior finding's quality sits below the configured gate. Routing
//! picks the least-privileged capable worker: best domain-tag match first,
//! then cheapest tier, then lexicographic profile id for reproducibility.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capability::CapabilityRegistry;
use crate::classify::Classifier;
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::executor::{CancelToken, ExecFailure, WorkerInvocation, WorkerOutput, WorkerPool, WorkerSet};
use crate::knowledge::{KnowledgeStore, WriteRequest};
use crate::shared::{FailureReason, Task, TaskEvent, TaskState};

/// Capacity of the task-event broadcast channel. Slow subscribers lag, they
/// never block the scheduler.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The routing and lifecycle engine. Share behind an `Arc`; `submit` spawns
/// one processing task per request.
pub struct Scheduler {
    store: Arc<KnowledgeStore>,
    registry: Arc<CapabilityRegistry>,
    classifier: Arc<dyn Classifier>,
    workers: WorkerSet,
    pool: WorkerPool,
    tasks: DashMap<Uuid, Task>,
    cancels: DashMap<Uuid, CancelToken>,
    events: broadcast::Sender<TaskEvent>,
    config: CoreConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<KnowledgeStore>,
        registry: Arc<CapabilityRegistry>,
        classifier: Arc<dyn Classifier>,
        workers: WorkerSet,
        config: CoreConfig,
    ) -> Arc<Self> {
        let pool = WorkerPool::new(config.pool_size, config.queue_bound);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            store,
            registry,
            classifier,
            workers,
            pool,
            tasks: DashMap::new(),
            cancels: DashMap::new(),
            events,
            config,
        })
    }

    /// Accepts a request and returns its task id immediately. Poll
    /// [`status`](Self::status) or [`subscribe`](Self::subscribe) for the
    /// terminal state.
    pub fn submit(
        self: &Arc<Self>,
        request_text: &str,
        priority: i32,
        deadline: Option<DateTime<Utc>>,
    ) -> Uuid {
        let deadline = deadline.unwrap_or_else(|| Utc::now() + self.config.task_timeout());
        let task = Task::new(request_text, priority, deadline);
        let id = task.id;
        self.tasks.insert(id, task);
        debug!(task_id = %id, "task submitted");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.process(id).await;
        });
        id
    }

    /// Snapshot of a live (not yet swept) task.
    pub fn status(&self, id: Uuid) -> Option<Task> {
        self.tasks.get(&id).map(|entry| entry.value().clone())
    }

    /// State-change events, including terminal ones with their
    /// machine-readable failure reason.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Cooperatively cancels a non-terminal task. The running worker (if
    /// any) observes the tripped token; its buffered output is discarded.
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.status(id) {
            Some(task) if !task.state.is_terminal() => {
                if let Some(token) = self.cancels.get(&id) {
                    token.cancel();
                }
                self.transition(id, |t| t.state = TaskState::Cancelled);
                info!(task_id = %id, "task cancelled");
                true
            }
            _ => false,
        }
    }

    /// Drops terminal tasks older than the retention window from the live
    /// table. Called from the periodic scan loop.
    pub fn sweep_archived(&self) -> usize {
        let cutoff = Utc::now() - self.config.task_retention();
        let before = self.tasks.len();
        self.tasks
            .retain(|_, task| !(task.state.is_terminal() && task.updated_at < cutoff));
        let removed = before - self.tasks.len();
        if removed > 0 {
            info!(removed, "terminal tasks archived");
        }
        removed
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    async fn process(self: Arc<Self>, id: Uuid) {
        let Some(task) = self.status(id) else { return };
        if task.state.is_terminal() {
            return;
        }

        // Classification happens exactly once per task.
        let classification = self.classifier.classify(&task.request_text);
        let Some(task) = self.transition(id, |t| {
            t.topic = classification.topic.clone();
            t.domain_tags = classification.domain_tags.clone();
            t.required_operations = classification.required_operations;
        }) else {
            return;
        };
        if task.state.is_terminal() {
            return;
        }

        // An older live task on the same topic and tags is the primary;
        // ride on its result instead of dispatching a second worker.
        if let Some(primary) = self.find_live_duplicate(&task) {
            debug!(task_id = %id, primary = %primary, "coalescing onto live duplicate");
            if let Some(done) = self.await_terminal(primary, task.deadline).await {
                if done.state == TaskState::Completed {
                    if let Some(doc) = done.result_doc {
                        self.transition(id, |t| {
                            t.state = TaskState::Completed;
                            t.result_doc = Some(doc);
                        });
                        return;
                    }
                }
            }
            // The primary failed, was cancelled, or timed out; fall through
            // to the normal path.
        }

        // Coverage query: a fresh document above the quality gate resolves
        // the task with no dispatch at all.
        match self
            .store
            .find(&task.topic, &task.domain_tags, self.config.freshness_window())
        {
            Ok(hits) => {
                if let Some(doc) = hits
                    .iter()
                    .find(|d| d.quality_score >= self.config.quality_threshold)
                {
                    info!(task_id = %id, doc_id = %doc.id, "coverage hit, returning existing document");
                    let doc_id = doc.id;
                    self.transition(id, |t| {
                        t.state = TaskState::Completed;
                        t.result_doc = Some(doc_id);
                    });
                    return;
                }
            }
            Err(err) => {
                self.fail(id, FailureReason::Internal(err.to_string()));
                return;
            }
        }

        // Routing: ranked lookup, filtered to profiles whose allowance
        // covers the requirement; first match wins.
        let profile = self
            .registry
            .lookup(&task.domain_tags)
            .into_iter()
            .find(|p| p.allows(task.required_operations))
            .cloned();
        let Some(profile) = profile else {
            warn!(task_id = %id, required = %task.required_operations, "no capable worker");
            self.fail(id, FailureReason::NoCapableWorker);
            return;
        };
        let Some(worker) = self.workers.get(&profile.id) else {
            warn!(task_id = %id, profile = %profile.id, "profile has no registered worker");
            self.fail(id, FailureReason::NoCapableWorker);
            return;
        };

        let cancel = CancelToken::new();
        self.cancels.insert(id, cancel.clone());
        let Some(task) = self.transition(id, |t| {
            t.state = TaskState::Assigned;
            t.assigned_worker = Some(profile.id.clone());
        }) else {
            return;
        };
        if task.state.is_terminal() {
            return;
        }

        let invocation = WorkerInvocation {
            task: task.clone(),
            allowance: profile.allowed_operations,
        };
        let receiver = match self.pool.submit(invocation, worker, cancel, task.deadline) {
            Ok(receiver) => receiver,
            Err(CoreError::Overloaded { queue_bound }) => {
                warn!(task_id = %id, queue_bound, "executor overloaded");
                self.fail(id, FailureReason::Overloaded);
                return;
            }
            Err(err) => {
                self.fail(id, FailureReason::Internal(err.to_string()));
                return;
            }
        };
        self.transition(id, |t| t.state = TaskState::Running);

        let outcome = match receiver.await {
            Ok(outcome) => outcome,
            // The runner vanished; treat as a cancelled execution.
            Err(_) => Err(ExecFailure::Cancelled),
        };
        self.cancels.remove(&id);

        match outcome {
            Ok(output) => {
                // Discard late output from a task that went terminal (e.g.
                // cancelled) while the worker was finishing.
                match self.status(id) {
                    Some(t) if !t.state.is_terminal() => {
                        self.commit(id, &profile.id, output).await
                    }
                    _ => debug!(task_id = %id, "discarding output from terminal task"),
                }
            }
            Err(ExecFailure::Cancelled) => {
                self.transition(id, |t| t.state = TaskState::Cancelled);
            }
            Err(ExecFailure::PrivilegeViolation) => {
                self.fail(id, FailureReason::NoCapableWorker);
            }
            Err(ExecFailure::Worker(message)) => {
                self.fail(id, FailureReason::Worker(message));
            }
        }
    }

    /// Commits a worker's buffered output through the bounded optimistic
    /// retry path.
    async fn commit(&self, id: Uuid, author: &str, output: WorkerOutput) {
        let request = WriteRequest {
            doc_id: output.doc_id,
            topic: output.topic,
            tags: output.tags,
            body: output.body,
            base_version: output.base_version,
            author: author.to_string(),
            diff_summary: output.diff_summary,
            synthesized: false,
        };
        match self
            .store
            .write_with_retry(
                request,
                self.config.write_retry_attempts,
                self.config.write_retry_backoff(),
            )
            .await
        {
            Ok(doc) => {
                info!(task_id = %id, doc_id = %doc.id, version = doc.version, "result committed");
                self.transition(id, |t| {
                    t.state = TaskState::Completed;
                    t.result_doc = Some(doc.id);
                });
            }
            Err(CoreError::WriteConflict { current_version }) => {
                warn!(task_id = %id, current_version, "write retries exhausted");
                self.fail(id, FailureReason::WriteConflict);
            }
            Err(err) => {
                self.fail(id, FailureReason::Internal(err.to_string()));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Applies a mutation and broadcasts the resulting state. Terminal
    /// tasks are never mutated again; callers get the unchanged snapshot
    /// back and bail out.
    fn transition(&self, id: Uuid, apply: impl FnOnce(&mut Task)) -> Option<Task> {
        let snapshot = {
            let mut entry = self.tasks.get_mut(&id)?;
            let task = entry.value_mut();
            if task.state.is_terminal() {
                return Some(task.clone());
            }
            apply(task);
            task.updated_at = Utc::now();
            task.clone()
        };
        let _ = self.events.send(TaskEvent::from_task(&snapshot));
        if snapshot.state.is_terminal() {
            self.cancels.remove(&id);
        }
        Some(snapshot)
    }

    fn fail(&self, id: Uuid, reason: FailureReason) {
        self.transition(id, |t| {
            t.state = TaskState::Failed;
            t.failure = Some(reason);
        });
    }

    /// Oldest live task with the same topic and tag set, if it was created
    /// before `me`. Ordering on (created_at, id) keeps the choice
    /// deterministic when submissions race.
    fn find_live_duplicate(&self, me: &Task) -> Option<Uuid> {
        let mut best: Option<(DateTime<Utc>, Uuid)> = None;
        for entry in self.tasks.iter() {
            let other = entry.value();
            if other.id == me.id || other.state.is_terminal() {
                continue;
            }
            if other.topic != me.topic || other.domain_tags != me.domain_tags {
                continue;
            }
            let key = (other.created_at, other.id);
            if key < (me.created_at, me.id) && best.map_or(true, |b| key < b) {
                best = Some(key);
            }
        }
        best.map(|(_, id)| id)
    }

    /// Waits until `id` reaches a terminal state, bounded by `deadline`.
    async fn await_terminal(&self, id: Uuid, deadline: DateTime<Utc>) -> Option<Task> {
        let mut events = self.events.subscribe();
        loop {
            match self.status(id) {
                None => return None,
                Some(task) if task.state.is_terminal() => return Some(task),
                Some(_) => {}
            }
            let remaining = (deadline - Utc::now()).to_std().ok()?;
            match tokio::time::timeout(remaining, events.recv()).await {
                Ok(Ok(event)) if event.task_id == id && event.state.is_terminal() => {
                    return self.status(id);
                }
                Ok(Ok(_)) => {}
                // Lagged: loop around and re-check status directly.
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => {}
                Ok(Err(broadcast::error::RecvError::Closed)) => return self.status(id),
                Err(_elapsed) => return None,
            }
        }
    }
}
