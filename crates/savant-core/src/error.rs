//! Error taxonomy for the orchestration core.
//!
//! Routing and write errors surface as the owning task's terminal state;
//! extraction errors are recovered locally by the synthesis engine; cycle
//! errors are rejected synchronously at the `link` call and never partially
//! applied. Every retry loop in the crate has a fixed bound.

use thiserror::Error;
use uuid::Uuid;

use crate::shared::OperationSet;

/// Unified error type for store, routing, executor, and synthesis operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No registered profile satisfies the task's required operations.
    #[error("no capable worker for required operations {0}")]
    NoCapableWorker(OperationSet),

    /// Optimistic write lost the version race. Carries the version the
    /// caller must re-read before retrying.
    #[error("write conflict: stored version is {current_version}")]
    WriteConflict { current_version: u64 },

    /// Executor queue is full; the submission was rejected, not queued.
    #[error("executor overloaded: queue bound {queue_bound} reached")]
    Overloaded { queue_bound: usize },

    /// A synthesis cluster dropped below two usable documents.
    #[error("synthesis cluster has fewer than 2 usable documents")]
    InsufficientInput,

    /// Inserting the edge would close a Supersedes cycle.
    #[error("supersedes edge {from} -> {to} would create a cycle")]
    Cycle { from: Uuid, to: Uuid },

    /// Claim extraction failed for one document. Non-fatal to a batch.
    #[error("claim extraction failed for document {doc_id}: {reason}")]
    Extraction { doc_id: Uuid, reason: String },

    /// Referenced document does not exist in the store.
    #[error("document {0} not found")]
    DocumentNotFound(Uuid),

    /// Referenced task is not in the live task table.
    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    /// Two registry profiles declared the same id. Boot-time fatal.
    #[error("duplicate capability profile id '{0}'")]
    DuplicateProfile(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("manifest parse error: {0}")]
    Manifest(#[from] toml::de::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// True for the conflict variant, regardless of the version it carries.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::WriteConflict { .. })
    }
}
