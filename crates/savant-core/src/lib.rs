//! savant-core: research orchestration core.
//!
//! Routes incoming requests to the narrowest-privileged capable worker,
//! dedupes against a versioned knowledge store before dispatching, and
//! periodically merges overlapping findings into contradiction-aware
//! synthesis documents.
//!
//! Pipeline: request -> [`Classifier`] -> [`Scheduler`] (consults
//! [`KnowledgeStore`]) -> coverage hit returns the existing document, miss
//! dispatches through the [`executor`] worker pool -> the worker's buffered
//! output lands in the store -> the [`SynthesisEngine`] scans the link
//! graph for topic clusters and emits derived documents.

mod capability;
mod classify;
mod config;
mod error;
mod knowledge;
mod scheduler;
mod shared;
pub mod executor;
pub mod synthesis;

// Shared task and operation types.
pub use shared::{FailureReason, Operation, OperationSet, Task, TaskEvent, TaskState};

// Configuration and errors.
pub use config::CoreConfig;
pub use error::CoreError;

// Capability registry (static at boot, read-only after).
pub use capability::{CapabilityProfile, CapabilityRegistry, CostTier, RegistryManifest};

// Classification boundary.
pub use classify::{topic_slug, Classification, Classifier, KeywordClassifier};

// Knowledge store and link graph.
pub use knowledge::{
    jaccard, DocumentSummary, EdgeKind, KnowledgeDocument, KnowledgeEdge, KnowledgeStore,
    Revision, WriteRequest,
};

// Scheduler/router.
pub use scheduler::Scheduler;

// Worker boundary and executor.
pub use executor::{
    CancelToken, ExecFailure, Worker, WorkerInvocation, WorkerOutput, WorkerPool, WorkerSet,
};

// Synthesis engine.
pub use synthesis::{
    Claim, ClaimExtractor, Contradiction, LineClaimExtractor, SynthesisEngine, SynthesisJob,
    SynthesisState, SYNTHESIS_AUTHOR,
};
