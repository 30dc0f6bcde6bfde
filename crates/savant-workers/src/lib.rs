//! Reference [`Worker`] implementations for the savant core.
//!
//! All three workers are deterministic and fully offline: they derive their
//! findings from the task snapshot alone and emit bodies in the claim line
//! format (`subject :: predicate :: value`) that the default synthesis
//! extractor consumes. Each worker is bound to one capability profile;
//! [`default_profiles`] returns the matching registry entries and
//! [`default_worker_set`] the executable side of the same table.

mod archivist;
mod ops_probe;
mod research;

pub use archivist::ArchivistWorker;
pub use ops_probe::OpsProbeWorker;
pub use research::ResearchWorker;

use std::collections::BTreeSet;
use std::sync::Arc;

use savant_core::{CapabilityProfile, CostTier, Operation, OperationSet, WorkerSet};

fn tags(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Capability profiles matching the reference workers, cheapest and
/// narrowest first.
pub fn default_profiles() -> Vec<CapabilityProfile> {
    vec![
        CapabilityProfile {
            id: ArchivistWorker::PROFILE_ID.to_string(),
            allowed_operations: OperationSet::of(&[Operation::ReadDoc, Operation::WriteDoc]),
            domain_tags: tags(&["notes", "testing", "react", "rust"]),
            cost_tier: CostTier::Low,
        },
        CapabilityProfile {
            id: ResearchWorker::PROFILE_ID.to_string(),
            allowed_operations: OperationSet::of(&[
                Operation::ReadDoc,
                Operation::WriteDoc,
                Operation::FetchExternal,
            ]),
            domain_tags: tags(&["react", "rust", "web", "database", "api", "security"]),
            cost_tier: CostTier::Mid,
        },
        CapabilityProfile {
            id: OpsProbeWorker::PROFILE_ID.to_string(),
            allowed_operations: OperationSet::of(&[
                Operation::ReadDoc,
                Operation::WriteDoc,
                Operation::ExecuteShell,
            ]),
            domain_tags: tags(&["ops", "infra"]),
            cost_tier: CostTier::High,
        },
    ]
}

/// Worker set executing the profiles from [`default_profiles`].
pub fn default_worker_set() -> WorkerSet {
    let mut set = WorkerSet::new();
    set.register(Arc::new(ArchivistWorker::new()));
    set.register(Arc::new(ResearchWorker::new()));
    set.register(Arc::new(OpsProbeWorker::new()));
    set
}
