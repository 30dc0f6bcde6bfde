//! Sled-backed document store with optimistic, version-checked writes.
//!
//! Tree layout:
//! - `documents`   — doc id (16 raw bytes) -> JSON [`KnowledgeDocument`]
//! - `revisions`   — `{id}/{version:010}`  -> JSON [`Revision`] (append-only)
//! - `edges`       — `{from}/{to}/{kind}`  -> JSON edge (see graph.rs)
//! - `edges_rev`   — `{to}/{from}/{kind}`  -> JSON edge (reverse index)
//!
//! Writers never block each other: a write that loses the version race gets
//! `WriteConflict` back and retries against the fresh version. The version
//! check rides on sled's `compare_and_swap`, so exactly one writer wins each
//! version.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use sled::{Db, Tree};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{jaccard, DocumentSummary, KnowledgeDocument, Revision};
use crate::config::CoreConfig;
use crate::error::CoreError;

/// Weights for the quality blend. Recency dominates so a freshly written
/// document clears the default dedup gate on its own.
const QUALITY_RECENCY_WEIGHT: f32 = 0.55;
const QUALITY_REVISION_WEIGHT: f32 = 0.30;
const QUALITY_LINK_WEIGHT: f32 = 0.15;

/// Revision count at which the revision term saturates.
const QUALITY_REVISION_CAP: u64 = 3;
/// In-degree at which the link term saturates.
const QUALITY_LINK_CAP: usize = 5;
/// Days over which the recency term decays linearly to zero.
const QUALITY_RECENCY_HORIZON_DAYS: f32 = 365.0;

pub(super) const TREE_DOCUMENTS: &str = "documents";
pub(super) const TREE_REVISIONS: &str = "revisions";
pub(super) const TREE_EDGES: &str = "edges";
pub(super) const TREE_EDGES_REV: &str = "edges_rev";

/// Input for one optimistic write.
///
/// `doc_id: None` creates a new document at version 1 (`base_version` is
/// ignored); `doc_id: Some` updates, and succeeds only if the stored version
/// still equals `base_version`.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub doc_id: Option<Uuid>,
    pub topic: String,
    pub tags: BTreeSet<String>,
    pub body: String,
    pub base_version: u64,
    /// Worker (or engine) id recorded on the revision.
    pub author: String,
    pub diff_summary: String,
    pub synthesized: bool,
}

impl WriteRequest {
    /// Convenience constructor for a brand-new document.
    pub fn create(
        topic: impl Into<String>,
        tags: BTreeSet<String>,
        body: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            doc_id: None,
            topic: topic.into(),
            tags,
            body: body.into(),
            base_version: 0,
            author: author.into(),
            diff_summary: "created".to_string(),
            synthesized: false,
        }
    }

    /// Convenience constructor for an update against `base_version`.
    pub fn update(
        doc_id: Uuid,
        base_version: u64,
        body: impl Into<String>,
        author: impl Into<String>,
        diff_summary: impl Into<String>,
    ) -> Self {
        Self {
            doc_id: Some(doc_id),
            topic: String::new(),
            tags: BTreeSet::new(),
            body: body.into(),
            base_version,
            author: author.into(),
            diff_summary: diff_summary.into(),
            synthesized: false,
        }
    }
}

/// The versioned document repository. Cheap to share behind an `Arc`; all
/// methods take `&self`.
pub struct KnowledgeStore {
    #[allow(dead_code)]
    db: Db,
    documents: Tree,
    revisions: Tree,
    pub(super) edges: Tree,
    pub(super) edges_rev: Tree,
    find_similarity_threshold: f32,
}

impl KnowledgeStore {
    /// Opens (or creates) the store under `config.data_dir`.
    pub fn open(config: &CoreConfig) -> Result<Self, CoreError> {
        let db = sled::open(&config.data_dir)?;
        let documents = db.open_tree(TREE_DOCUMENTS)?;
        let revisions = db.open_tree(TREE_REVISIONS)?;
        let edges = db.open_tree(TREE_EDGES)?;
        let edges_rev = db.open_tree(TREE_EDGES_REV)?;
        info!(path = %config.data_dir.display(), "knowledge store opened");
        Ok(Self {
            db,
            documents,
            revisions,
            edges,
            edges_rev,
            find_similarity_threshold: config.find_similarity_threshold,
        })
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn get(&self, id: Uuid) -> Result<Option<KnowledgeDocument>, CoreError> {
        match self.documents.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(super) fn get_required(&self, id: Uuid) -> Result<KnowledgeDocument, CoreError> {
        self.get(id)?.ok_or(CoreError::DocumentNotFound(id))
    }

    /// All documents, in id order. Synthesis and scan cycles iterate this;
    /// request-path callers use `find` instead.
    pub fn all_documents(&self) -> Result<Vec<KnowledgeDocument>, CoreError> {
        let mut docs = Vec::new();
        for entry in self.documents.iter() {
            let (_, bytes) = entry?;
            docs.push(serde_json::from_slice(&bytes)?);
        }
        Ok(docs)
    }

    /// Ordered revision log for a document. Length always equals the
    /// document's current version.
    pub fn revisions(&self, id: Uuid) -> Result<Vec<Revision>, CoreError> {
        let mut out = Vec::new();
        for entry in self.revisions.scan_prefix(revision_prefix(id)) {
            let (_, bytes) = entry?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    /// Coverage query: documents whose topic slug matches exactly or whose
    /// tag set is similar above the configured threshold, modified within
    /// `freshness_window`. An empty result is a genuine miss. Results are
    /// ordered by quality descending.
    pub fn find(
        &self,
        topic: &str,
        tags: &BTreeSet<String>,
        freshness_window: Duration,
    ) -> Result<Vec<KnowledgeDocument>, CoreError> {
        let cutoff = Utc::now() - freshness_window;
        let mut hits: Vec<KnowledgeDocument> = self
            .all_documents()?
            .into_iter()
            .filter(|doc| doc.modified_at >= cutoff)
            .filter(|doc| {
                doc.topic == topic || jaccard(&doc.tags, tags) >= self.find_similarity_threshold
            })
            .collect();
        hits.sort_by(|a, b| {
            b.quality_score
                .partial_cmp(&a.quality_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        debug!(topic, hit_count = hits.len(), "coverage query");
        Ok(hits)
    }

    /// Read-only metadata query for external tooling. Same matching rule as
    /// `find` but without the freshness filter; ordered newest first.
    pub fn query(
        &self,
        topic: &str,
        tags: &BTreeSet<String>,
    ) -> Result<Vec<DocumentSummary>, CoreError> {
        let mut summaries: Vec<DocumentSummary> = self
            .all_documents()?
            .iter()
            .filter(|doc| {
                doc.topic == topic || jaccard(&doc.tags, tags) >= self.find_similarity_threshold
            })
            .map(DocumentSummary::from)
            .collect();
        summaries.sort_by_key(|s| std::cmp::Reverse(s.modified_at));
        Ok(summaries)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Optimistic write. Creates at version 1, or updates iff the stored
    /// version equals `base_version`; the loser of a race gets
    /// `WriteConflict { current_version }` and must re-read before retrying.
    /// On success the revision log gains exactly one entry and the quality
    /// score is recomputed.
    pub fn write(&self, req: WriteRequest) -> Result<KnowledgeDocument, CoreError> {
        match req.doc_id {
            None => self.create(req),
            Some(id) => self.update(id, req),
        }
    }

    fn create(&self, req: WriteRequest) -> Result<KnowledgeDocument, CoreError> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let mut doc = KnowledgeDocument {
            id,
            topic: req.topic,
            tags: req.tags,
            body: req.body,
            version: 1,
            created_at: now,
            modified_at: now,
            links: BTreeSet::new(),
            quality_score: 0.0,
            synthesized: req.synthesized,
        };
        doc.quality_score = compute_quality(doc.version, 0, doc.modified_at, now);

        let bytes = serde_json::to_vec(&doc)?;
        // A fresh v4 id cannot collide in practice; the CAS still guards it.
        if self
            .documents
            .compare_and_swap(id.as_bytes(), None::<&[u8]>, Some(bytes))?
            .is_err()
        {
            return Err(CoreError::WriteConflict { current_version: 1 });
        }
        self.append_revision(id, 1, &req.author, &req.diff_summary, now)?;
        debug!(doc_id = %id, topic = %doc.topic, "document created");
        Ok(doc)
    }

    fn update(&self, id: Uuid, req: WriteRequest) -> Result<KnowledgeDocument, CoreError> {
        let current = self.get_required(id)?;
        if current.version != req.base_version {
            return Err(CoreError::WriteConflict {
                current_version: current.version,
            });
        }

        let now = Utc::now();
        let mut next = current.clone();
        next.version = current.version + 1;
        next.body = req.body;
        if !req.topic.is_empty() {
            next.topic = req.topic;
        }
        if !req.tags.is_empty() {
            next.tags = req.tags;
        }
        next.modified_at = now;
        next.quality_score = compute_quality(next.version, self.in_degree(id)?, now, now);

        let old_bytes = serde_json::to_vec(&current)?;
        let new_bytes = serde_json::to_vec(&next)?;
        match self.documents.compare_and_swap(
            id.as_bytes(),
            Some(old_bytes.as_slice()),
            Some(new_bytes),
        )? {
            Ok(()) => {
                self.append_revision(id, next.version, &req.author, &req.diff_summary, now)?;
                debug!(doc_id = %id, version = next.version, "document updated");
                Ok(next)
            }
            Err(_) => {
                // Lost the swap to a concurrent writer; report the version
                // that actually landed.
                let latest = self.get_required(id)?;
                warn!(doc_id = %id, current_version = latest.version, "write conflict");
                Err(CoreError::WriteConflict {
                    current_version: latest.version,
                })
            }
        }
    }

    /// Bounded-retry wrapper around `write`: on conflict, rebases onto the
    /// version that won and retries with exponential backoff, up to
    /// `attempts` total tries. The final conflict is returned to the caller.
    pub async fn write_with_retry(
        &self,
        mut req: WriteRequest,
        attempts: u32,
        initial_backoff: std::time::Duration,
    ) -> Result<KnowledgeDocument, CoreError> {
        let attempts = attempts.max(1);
        let mut delay = initial_backoff;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.write(req.clone()) {
                Err(CoreError::WriteConflict { current_version }) if attempt < attempts => {
                    debug!(
                        attempt,
                        current_version, "rebasing write after conflict"
                    );
                    req.base_version = current_version;
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                other => return other,
            }
        }
    }

    fn append_revision(
        &self,
        id: Uuid,
        version: u64,
        author: &str,
        diff_summary: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let revision = Revision {
            version,
            timestamp,
            author: author.to_string(),
            diff_summary: diff_summary.to_string(),
        };
        self.revisions
            .insert(revision_key(id, version), serde_json::to_vec(&revision)?)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Quality
    // -----------------------------------------------------------------------

    /// Recomputes the deterministic quality score for a stored document.
    pub fn score_quality(&self, doc: &KnowledgeDocument) -> Result<f32, CoreError> {
        Ok(compute_quality(
            doc.version,
            self.in_degree(doc.id)?,
            doc.modified_at,
            Utc::now(),
        ))
    }

    /// Atomically patches the stored record's quality score after the link
    /// graph changed. Keeps the old record when re-serialization fails, so
    /// the score update can never corrupt a document.
    pub(super) fn refresh_quality(&self, id: Uuid) -> Result<(), CoreError> {
        let in_degree = self.in_degree(id)?;
        let now = Utc::now();
        self.documents.fetch_and_update(id.as_bytes(), |old| {
            let old = old?;
            let mut doc: KnowledgeDocument = serde_json::from_slice(old).ok()?;
            doc.quality_score = compute_quality(doc.version, in_degree, doc.modified_at, now);
            match serde_json::to_vec(&doc) {
                Ok(bytes) => Some(bytes),
                Err(_) => Some(old.to_vec()),
            }
        })?;
        Ok(())
    }

    /// Atomically mirrors an outgoing link into the source document.
    pub(super) fn mirror_link(&self, from: Uuid, to: Uuid) -> Result<(), CoreError> {
        self.documents.fetch_and_update(from.as_bytes(), |old| {
            let old = old?;
            let mut doc: KnowledgeDocument = serde_json::from_slice(old).ok()?;
            doc.links.insert(to);
            match serde_json::to_vec(&doc) {
                Ok(bytes) => Some(bytes),
                Err(_) => Some(old.to_vec()),
            }
        })?;
        Ok(())
    }
}

/// Deterministic quality blend over revision count, link in-degree, and
/// recency. Pinned to [0, 1].
fn compute_quality(
    version: u64,
    in_degree: usize,
    modified_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f32 {
    let revision_term = version.min(QUALITY_REVISION_CAP) as f32 / QUALITY_REVISION_CAP as f32;
    let link_term = in_degree.min(QUALITY_LINK_CAP) as f32 / QUALITY_LINK_CAP as f32;
    let age_days = (now - modified_at).num_days().max(0) as f32;
    let recency_term = (1.0 - age_days / QUALITY_RECENCY_HORIZON_DAYS).clamp(0.0, 1.0);

    (QUALITY_RECENCY_WEIGHT * recency_term
        + QUALITY_REVISION_WEIGHT * revision_term
        + QUALITY_LINK_WEIGHT * link_term)
        .clamp(0.0, 1.0)
}

pub(super) fn revision_key(id: Uuid, version: u64) -> Vec<u8> {
    format!("{}/{:010}", id.simple(), version).into_bytes()
}

fn revision_prefix(id: Uuid) -> Vec<u8> {
    format!("{}/", id.simple()).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_document_clears_default_quality_gate() {
        let now = Utc::now();
        let score = compute_quality(1, 0, now, now);
        assert!(score >= 0.6, "fresh v1 score {score} should clear 0.6");
    }

    #[test]
    fn quality_grows_with_revisions_and_links() {
        let now = Utc::now();
        let base = compute_quality(1, 0, now, now);
        assert!(compute_quality(3, 0, now, now) > base);
        assert!(compute_quality(1, 4, now, now) > base);
        assert!(compute_quality(5, 10, now, now) <= 1.0);
    }

    #[test]
    fn quality_decays_with_age() {
        let now = Utc::now();
        let old = now - Duration::days(180);
        assert!(compute_quality(1, 0, old, now) < compute_quality(1, 0, now, now));
    }

    #[test]
    fn revision_keys_sort_by_version() {
        let id = Uuid::new_v4();
        let k1 = revision_key(id, 1);
        let k2 = revision_key(id, 2);
        let k10 = revision_key(id, 10);
        assert!(k1 < k2);
        assert!(k2 < k10);
    }
}
