//! Shared types used across the core: operations, operation sets, tasks,
//! and the task lifecycle.
//!
//! Worker allowances and task requirements are closed-enum operations packed
//! into a `u8` bitmask so privilege checks are a single subset comparison
//! instead of stringly-typed list scans.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Operations and operation sets
// ---------------------------------------------------------------------------

/// A single operation a worker may be allowed to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Read documents from the knowledge store.
    ReadDoc,
    /// Write or update knowledge documents.
    WriteDoc,
    /// Modify source files in a workspace.
    EditSource,
    /// Run shell commands.
    ExecuteShell,
    /// Fetch content from external sources.
    FetchExternal,
}

impl Operation {
    /// All operations, in bit order.
    pub const ALL: [Operation; 5] = [
        Operation::ReadDoc,
        Operation::WriteDoc,
        Operation::EditSource,
        Operation::ExecuteShell,
        Operation::FetchExternal,
    ];

    /// Bit position of this operation in an [`OperationSet`] mask.
    #[inline]
    pub fn bit(self) -> u8 {
        match self {
            Operation::ReadDoc => 1 << 0,
            Operation::WriteDoc => 1 << 1,
            Operation::EditSource => 1 << 2,
            Operation::ExecuteShell => 1 << 3,
            Operation::FetchExternal => 1 << 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::ReadDoc => "read_doc",
            Operation::WriteDoc => "write_doc",
            Operation::EditSource => "edit_source",
            Operation::ExecuteShell => "execute_shell",
            Operation::FetchExternal => "fetch_external",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "read_doc" => Some(Operation::ReadDoc),
            "write_doc" => Some(Operation::WriteDoc),
            "edit_source" => Some(Operation::EditSource),
            "execute_shell" => Some(Operation::ExecuteShell),
            "fetch_external" => Some(Operation::FetchExternal),
            _ => None,
        }
    }
}

/// Set of [`Operation`]s packed into a bitmask. Subset checks are O(1).
///
/// Serializes as a list of operation names so registry manifests stay
/// human-editable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OperationSet(u8);

impl OperationSet {
    pub const EMPTY: OperationSet = OperationSet(0);

    /// Builds a set from a slice of operations.
    pub fn of(ops: &[Operation]) -> Self {
        let mut set = Self::EMPTY;
        for op in ops {
            set.insert(*op);
        }
        set
    }

    #[inline]
    pub fn insert(&mut self, op: Operation) {
        self.0 |= op.bit();
    }

    /// Returns a copy of this set with `op` added.
    #[inline]
    pub fn with(mut self, op: Operation) -> Self {
        self.insert(op);
        self
    }

    #[inline]
    pub fn contains(self, op: Operation) -> bool {
        self.0 & op.bit() != 0
    }

    /// True iff every operation in `self` is also in `other`.
    #[inline]
    pub fn is_subset_of(self, other: OperationSet) -> bool {
        self.0 & !other.0 == 0
    }

    #[inline]
    pub fn union(self, other: OperationSet) -> OperationSet {
        OperationSet(self.0 | other.0)
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates the members in bit order.
    pub fn iter(self) -> impl Iterator<Item = Operation> {
        Operation::ALL.into_iter().filter(move |op| self.contains(*op))
    }
}

impl fmt::Debug for OperationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for OperationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|op| op.as_str()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

impl FromIterator<Operation> for OperationSet {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for op in iter {
            set.insert(op);
        }
        set
    }
}

impl Serialize for OperationSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for OperationSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ops = Vec::<Operation>::deserialize(deserializer)?;
        Ok(ops.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Task lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// True for states a task never leaves.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Assigned => "assigned",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

/// Machine-readable reason recorded on a task that reached `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum FailureReason {
    /// Routing found no profile satisfying the required operations.
    NoCapableWorker,
    /// Optimistic concurrency exhausted its retry budget.
    WriteConflict,
    /// The executor rejected the submission under backpressure.
    Overloaded,
    /// The worker itself returned an error.
    Worker(String),
    /// A store or serialization failure outside the worker's control.
    Internal(String),
}

/// A unit of research work flowing through the scheduler and executor.
///
/// Created on submission, mutated only by the scheduler and the worker pool
/// executor, and swept from the live table a retention window after reaching
/// a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// Raw request text; opaque to the core, consumed by the classifier.
    pub request_text: String,
    /// Topic slug assigned by classification.
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub domain_tags: BTreeSet<String>,
    #[serde(default)]
    pub required_operations: OperationSet,
    pub priority: i32,
    pub state: TaskState,
    pub deadline: DateTime<Utc>,
    /// Profile id of the worker this task was routed to, once assigned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_worker: Option<String>,
    /// Knowledge document holding the result, once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_doc: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Creates a queued task with the given deadline.
    pub fn new(request_text: impl Into<String>, priority: i32, deadline: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            request_text: request_text.into(),
            topic: String::new(),
            domain_tags: BTreeSet::new(),
            required_operations: OperationSet::EMPTY,
            priority,
            state: TaskState::Queued,
            deadline,
            assigned_worker: None,
            result_doc: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Event broadcast when a task changes state. Terminal events always carry
/// the machine-readable failure reason, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: Uuid,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_doc: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            state: task.state,
            failure: task.failure.clone(),
            result_doc: task.result_doc,
            timestamp: Utc::now(),
        }
    }
}
