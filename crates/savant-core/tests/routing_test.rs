//! Integration test: scheduler/router. Verifies least-privilege routing,
//! knowledge-store deduplication, coalescing of live duplicates, failure
//! reasons, and cooperative cancellation, using the reference workers.
//!
//! ## Scenarios
//! 1. A plain request routes to the cheapest capable profile and lands a
//!    version-1 document.
//! 2. A request needing external fetch skips the narrow profile; the
//!    assignment never exceeds the worker's allowance.
//! 3. A second identical submission inside the freshness window returns the
//!    cached document with no second dispatch.
//! 4. Two live duplicates coalesce into one worker execution.
//! 5. Requirements nobody serves fail with `no_capable_worker`.
//! 6. Cancelling a running task discards its buffered output.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use savant_core::{
    CancelToken, CapabilityProfile, CapabilityRegistry, CoreConfig, CostTier, FailureReason,
    KeywordClassifier, KnowledgeStore, Operation, OperationSet, Scheduler, Task, TaskState,
    Worker, WorkerInvocation, WorkerOutput, WorkerSet,
};
use savant_workers::{default_profiles, default_worker_set, ArchivistWorker, ResearchWorker};
use uuid::Uuid;

fn test_config(dir: &tempfile::TempDir) -> CoreConfig {
    let mut config = CoreConfig::default().with_data_dir(dir.path().join("store"));
    config.pool_size = 2;
    config.queue_bound = 8;
    config.task_timeout_secs = 10;
    config
}

fn build_scheduler(dir: &tempfile::TempDir) -> (Arc<Scheduler>, Arc<KnowledgeStore>) {
    let config = test_config(dir);
    let store = Arc::new(KnowledgeStore::open(&config).expect("store opens"));
    let registry = Arc::new(CapabilityRegistry::from_profiles(default_profiles()).unwrap());
    let scheduler = Scheduler::new(
        Arc::clone(&store),
        registry,
        Arc::new(KeywordClassifier::new()),
        default_worker_set(),
        config,
    );
    (scheduler, store)
}

async fn await_terminal(scheduler: &Scheduler, id: Uuid) -> Task {
    for _ in 0..500 {
        if let Some(task) = scheduler.status(id) {
            if task.state.is_terminal() {
                return task;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("task {id} did not reach a terminal state in time");
}

// ===========================================================================
// Scenario 1: plain request routes to the cheapest capable profile
// ===========================================================================

#[tokio::test]
async fn plain_request_routes_least_privileged() {
    let dir = tempfile::tempdir().unwrap();
    let (scheduler, store) = build_scheduler(&dir);

    let id = scheduler.submit("research react hooks", 0, None);
    let task = await_terminal(&scheduler, id).await;

    assert_eq!(task.state, TaskState::Completed);
    // The archivist serves the react tag at the lowest cost tier and its
    // narrower allowance covers a read/write request, so it wins over the
    // mid-tier analyst.
    assert_eq!(task.assigned_worker.as_deref(), Some(ArchivistWorker::PROFILE_ID));

    let doc = store.get(task.result_doc.unwrap()).unwrap().unwrap();
    assert_eq!(doc.version, 1);
    assert!(doc.tags.contains("react"));
}

// ===========================================================================
// Scenario 2: required operations narrow the candidate list
// ===========================================================================

#[tokio::test]
async fn fetch_requirement_skips_narrow_profiles() {
    let dir = tempfile::tempdir().unwrap();
    let (scheduler, _store) = build_scheduler(&dir);

    let id = scheduler.submit("fetch the latest react hooks guidance upstream", 0, None);
    let task = await_terminal(&scheduler, id).await;

    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.assigned_worker.as_deref(), Some(ResearchWorker::PROFILE_ID));

    // Least privilege, checked as a property: the requirement is within the
    // assigned profile's allowance.
    let registry = CapabilityRegistry::from_profiles(default_profiles()).unwrap();
    let profile = registry.get(task.assigned_worker.as_deref().unwrap()).unwrap();
    assert!(task.required_operations.is_subset_of(profile.allowed_operations));
}

// ===========================================================================
// Scenario 3: dedup against the knowledge store
// ===========================================================================

#[tokio::test]
async fn second_identical_submission_reuses_the_document() {
    let dir = tempfile::tempdir().unwrap();
    let (scheduler, store) = build_scheduler(&dir);

    let first = scheduler.submit("research react hooks", 0, None);
    let first = await_terminal(&scheduler, first).await;
    assert_eq!(first.state, TaskState::Completed);

    let second = scheduler.submit("research react hooks", 0, None);
    let second = await_terminal(&scheduler, second).await;

    assert_eq!(second.state, TaskState::Completed);
    assert_eq!(second.result_doc, first.result_doc, "cache hit returns the same document");
    assert!(second.assigned_worker.is_none(), "no second dispatch");
    assert_eq!(store.all_documents().unwrap().len(), 1);
}

// ===========================================================================
// Scenario 4: live duplicates coalesce into one execution
// ===========================================================================

struct CountingWorker {
    executions: Arc<AtomicUsize>,
}

#[async_trait]
impl Worker for CountingWorker {
    fn profile_id(&self) -> &str {
        "counter"
    }

    fn description(&self) -> &str {
        "counts executions, slowly"
    }

    async fn execute(
        &self,
        invocation: &WorkerInvocation,
        _cancel: &CancelToken,
    ) -> Result<WorkerOutput, Box<dyn std::error::Error + Send + Sync>> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let task = &invocation.task;
        Ok(WorkerOutput::new_document(
            task.topic.clone(),
            task.domain_tags.clone(),
            format!("- {} :: counted :: yes", task.topic),
            "counted",
        ))
    }
}

fn counting_scheduler(
    dir: &tempfile::TempDir,
    executions: Arc<AtomicUsize>,
) -> Arc<Scheduler> {
    let config = test_config(dir);
    let store = Arc::new(KnowledgeStore::open(&config).unwrap());
    let registry = Arc::new(
        CapabilityRegistry::from_profiles(vec![CapabilityProfile {
            id: "counter".to_string(),
            allowed_operations: OperationSet::of(&[Operation::ReadDoc, Operation::WriteDoc]),
            domain_tags: ["react", "rust", "web"].iter().map(|s| s.to_string()).collect(),
            cost_tier: CostTier::Low,
        }])
        .unwrap(),
    );
    let mut workers = WorkerSet::new();
    workers.register(Arc::new(CountingWorker { executions }));
    Scheduler::new(store, registry, Arc::new(KeywordClassifier::new()), workers, config)
}

#[tokio::test]
async fn concurrent_duplicates_dispatch_once() {
    let dir = tempfile::tempdir().unwrap();
    let executions = Arc::new(AtomicUsize::new(0));
    let scheduler = counting_scheduler(&dir, Arc::clone(&executions));

    let first = scheduler.submit("research react hooks", 0, None);
    // Let the primary classify and dispatch before the duplicate arrives.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let second = scheduler.submit("research react hooks", 0, None);

    let first = await_terminal(&scheduler, first).await;
    let second = await_terminal(&scheduler, second).await;

    assert_eq!(first.state, TaskState::Completed);
    assert_eq!(second.state, TaskState::Completed);
    assert_eq!(first.result_doc, second.result_doc);
    assert_eq!(executions.load(Ordering::SeqCst), 1, "one live research task per topic");
}

// ===========================================================================
// Scenario 5: requirements nobody serves
// ===========================================================================

#[tokio::test]
async fn unserved_requirements_fail_with_reason() {
    let dir = tempfile::tempdir().unwrap();
    let (scheduler, _store) = build_scheduler(&dir);

    // Database-tagged request demanding shell execution; the only profile
    // serving that tag cannot execute shell commands.
    let id = scheduler.submit("run a benchmark command against the postgres database", 0, None);
    let task = await_terminal(&scheduler, id).await;

    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.failure, Some(FailureReason::NoCapableWorker));
    assert!(task.assigned_worker.is_none());
}

// ===========================================================================
// Scenario 6: cancellation discards buffered output
// ===========================================================================

struct StallingWorker;

#[async_trait]
impl Worker for StallingWorker {
    fn profile_id(&self) -> &str {
        "staller"
    }

    fn description(&self) -> &str {
        "waits for cancellation"
    }

    async fn execute(
        &self,
        invocation: &WorkerInvocation,
        cancel: &CancelToken,
    ) -> Result<WorkerOutput, Box<dyn std::error::Error + Send + Sync>> {
        cancel.cancelled().await;
        // Output built after cancellation must never be committed.
        let task = &invocation.task;
        Ok(WorkerOutput::new_document(
            task.topic.clone(),
            task.domain_tags.clone(),
            "- should :: never :: land",
            "stalled",
        ))
    }
}

#[tokio::test]
async fn cancelled_task_commits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let store = Arc::new(KnowledgeStore::open(&config).unwrap());
    let registry = Arc::new(
        CapabilityRegistry::from_profiles(vec![CapabilityProfile {
            id: "staller".to_string(),
            allowed_operations: OperationSet::of(&[Operation::ReadDoc, Operation::WriteDoc]),
            domain_tags: ["react"].iter().map(|s| s.to_string()).collect(),
            cost_tier: CostTier::Low,
        }])
        .unwrap(),
    );
    let mut workers = WorkerSet::new();
    workers.register(Arc::new(StallingWorker));
    let scheduler = Scheduler::new(
        Arc::clone(&store),
        registry,
        Arc::new(KeywordClassifier::new()),
        workers,
        config,
    );

    let id = scheduler.submit("research react hooks", 0, None);
    for _ in 0..200 {
        if scheduler.status(id).map(|t| t.state) == Some(TaskState::Running) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    assert!(scheduler.cancel(id));
    let task = await_terminal(&scheduler, id).await;
    assert_eq!(task.state, TaskState::Cancelled);
    assert!(store.all_documents().unwrap().is_empty(), "no partial write committed");

    // Cancelling a terminal task is a no-op.
    assert!(!scheduler.cancel(id));
}

// ===========================================================================
// Retention sweep
// ===========================================================================

#[tokio::test]
async fn sweep_removes_old_terminal_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let config = {
        let mut c = test_config(&dir);
        c.task_retention_hours = 0;
        c
    };
    let store = Arc::new(KnowledgeStore::open(&config).unwrap());
    let registry = Arc::new(CapabilityRegistry::from_profiles(default_profiles()).unwrap());
    let scheduler = Scheduler::new(
        store,
        registry,
        Arc::new(KeywordClassifier::new()),
        default_worker_set(),
        config,
    );

    let id = scheduler.submit("research react hooks", 0, Some(Utc::now() + chrono::Duration::seconds(10)));
    await_terminal(&scheduler, id).await;

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(scheduler.sweep_archived() >= 1);
    assert!(scheduler.status(id).is_none(), "archived task left the live table");
}
