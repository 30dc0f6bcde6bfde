//! Versioned knowledge store with a cross-link graph.
//!
//! Documents live in sled trees and are the single source of truth for
//! "has this already been researched". All mutation goes through
//! [`KnowledgeStore::write`] (optimistic, version-checked) and
//! [`KnowledgeStore::link`]; documents are never physically deleted, only
//! superseded. Coverage queries compare tag sets by Jaccard similarity.

mod graph;
mod store;

pub use graph::{EdgeKind, KnowledgeEdge};
pub use store::{KnowledgeStore, WriteRequest};

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One versioned research finding.
///
/// Invariants maintained by the store: `version` strictly increases with
/// each accepted write, and the revision log for the id always has exactly
/// `version` entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: Uuid,
    /// Normalized topic slug.
    pub topic: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub body: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// Outgoing edge mirror, maintained by `link`.
    #[serde(default)]
    pub links: BTreeSet<Uuid>,
    /// Deterministic blend of revision count, link in-degree, and recency.
    /// Recomputed on every accepted write and on link insertion.
    pub quality_score: f32,
    /// True for documents produced by the synthesis engine. Synthesis
    /// outputs are valid query results but are not clustered as inputs
    /// again.
    #[serde(default)]
    pub synthesized: bool,
}

/// Append-only log entry recording one accepted write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revision {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    /// Worker (or engine) id that produced this version.
    pub author: String,
    pub diff_summary: String,
}

/// Read-only projection of a document's metadata, returned by
/// [`KnowledgeStore::query`] for external tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub topic: String,
    pub tags: BTreeSet<String>,
    pub version: u64,
    pub links: BTreeSet<Uuid>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub quality_score: f32,
}

impl From<&KnowledgeDocument> for DocumentSummary {
    fn from(doc: &KnowledgeDocument) -> Self {
        Self {
            id: doc.id,
            topic: doc.topic.clone(),
            tags: doc.tags.clone(),
            version: doc.version,
            links: doc.links.clone(),
            created_at: doc.created_at,
            modified_at: doc.modified_at,
            quality_score: doc.quality_score,
        }
    }
}

/// Jaccard similarity of two tag sets: |intersection| / |union|.
/// Two empty sets are defined as dissimilar (0.0).
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    intersection as f32 / union as f32
}
