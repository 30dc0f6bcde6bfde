//! Synthesis engine: merges clusters of topically-overlapping documents
//! into one derived document with contradictions surfaced, never resolved.
//!
//! Runs as a periodic batch scan (or on demand), outside the request path:
//! 1. Cluster non-synthesized documents by tag Jaccard similarity.
//! 2. Snapshot each cluster newest-first; late writes wait for the next
//!    cycle.
//! 3. Extract `(subject, predicate, value)` claims per document through the
//!    pluggable extractor; a failing document is excluded, not fatal.
//! 4. Identical `(subject, predicate)` with differing values is recorded as
//!    a contradiction and excluded from the asserted findings.
//! 5. Commit the derived document (new, version 1) and link it `RelatesTo`
//!    every input. Synthesis augments its sources, it does not supersede
//!    them.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::knowledge::{jaccard, EdgeKind, KnowledgeDocument, KnowledgeStore, WriteRequest};
use crate::scheduler::Scheduler;

/// Author recorded on revisions written by the engine.
pub const SYNTHESIS_AUTHOR: &str = "synthesis_engine";

/// One atomic assertion extracted from a document body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub subject: String,
    pub predicate: String,
    pub value: String,
}

/// Pluggable claim extractor. Implementations must be deterministic for a
/// given body; an error excludes only the offending document from its
/// cluster.
pub trait ClaimExtractor: Send + Sync {
    fn extract(&self, doc: &KnowledgeDocument) -> Result<Vec<Claim>, CoreError>;
}

/// Default extractor over the line format the reference workers emit:
/// `subject :: predicate :: value`, one claim per line, with an optional
/// leading `- ` bullet. A line that contains the separator but does not
/// split into three non-empty fields is a malformed claim and fails the
/// document.
#[derive(Debug, Default)]
pub struct LineClaimExtractor;

impl LineClaimExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl ClaimExtractor for LineClaimExtractor {
    fn extract(&self, doc: &KnowledgeDocument) -> Result<Vec<Claim>, CoreError> {
        let mut claims = Vec::new();
        for line in doc.body.lines() {
            let line = line.trim().trim_start_matches("- ").trim();
            if !line.contains("::") {
                continue;
            }
            let fields: Vec<&str> = line.split("::").map(str::trim).collect();
            if fields.len() != 3 || fields.iter().any(|f| f.is_empty()) {
                return Err(CoreError::Extraction {
                    doc_id: doc.id,
                    reason: format!("malformed claim line: '{line}'"),
                });
            }
            claims.push(Claim {
                subject: fields[0].to_string(),
                predicate: fields[1].to_string(),
                value: fields[2].to_string(),
            });
        }
        Ok(claims)
    }
}

/// Two documents asserting different values for the same subject and
/// predicate. Surfaced as data; never auto-resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    pub doc_a: Uuid,
    pub doc_b: Uuid,
    pub subject: String,
    pub predicate: String,
    pub value_a: String,
    pub value_b: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One synthesis attempt over a cluster snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisJob {
    pub id: Uuid,
    /// Inputs sorted `modified_at` descending; fixed at job creation.
    pub input_doc_ids: Vec<Uuid>,
    pub state: SynthesisState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_doc: Option<Uuid>,
    pub contradictions: Vec<Contradiction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The batch engine. Share behind an `Arc` and drive it from
/// [`spawn_scan_loop`](Self::spawn_scan_loop) or call
/// [`run_scan`](Self::run_scan) directly.
pub struct SynthesisEngine {
    store: Arc<KnowledgeStore>,
    extractor: Arc<dyn ClaimExtractor>,
    config: CoreConfig,
}

impl SynthesisEngine {
    pub fn new(
        store: Arc<KnowledgeStore>,
        extractor: Arc<dyn ClaimExtractor>,
        config: CoreConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            config,
        }
    }

    /// One full scan cycle: cluster, synthesize, commit. Returns every job
    /// attempted this cycle, completed and failed alike.
    pub fn run_scan(&self) -> Result<Vec<SynthesisJob>, CoreError> {
        let mut all_docs = self.store.all_documents()?;
        // Deterministic clustering order regardless of tree iteration.
        all_docs.sort_by_key(|d| d.id);

        let (synth_docs, input_docs): (Vec<_>, Vec<_>) =
            all_docs.into_iter().partition(|d| d.synthesized);

        let mut jobs = Vec::new();
        for cluster in self.clusters(&input_docs) {
            let mut members: Vec<KnowledgeDocument> =
                cluster.into_iter().map(|i| input_docs[i].clone()).collect();
            // Most recent first: last-writer assertions take precedence.
            members.sort_by_key(|d| std::cmp::Reverse(d.modified_at));

            if self.already_covered(&members, &synth_docs) {
                debug!(members = members.len(), "cluster already covered by a synthesis document");
                continue;
            }

            let mut job = SynthesisJob {
                id: Uuid::new_v4(),
                input_doc_ids: members.iter().map(|d| d.id).collect(),
                state: SynthesisState::Pending,
                output_doc: None,
                contradictions: Vec::new(),
                failure: None,
                created_at: Utc::now(),
            };
            self.run_job(&mut job, &members)?;
            jobs.push(job);
        }
        info!(job_count = jobs.len(), "synthesis scan complete");
        Ok(jobs)
    }

    /// Spawns the periodic scan loop. Each tick also sweeps the scheduler's
    /// archived tasks when one is attached.
    pub fn spawn_scan_loop(
        self: Arc<Self>,
        scheduler: Option<Arc<Scheduler>>,
        interval: std::time::Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Some(scheduler) = &scheduler {
                    scheduler.sweep_archived();
                }
                match self.run_scan() {
                    Ok(jobs) => debug!(job_count = jobs.len(), "scan cycle finished"),
                    Err(err) => warn!(error = %err, "scan cycle failed"),
                }
            }
        })
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Greedy tag-similarity clustering; only groups of two or more are
    /// candidates.
    fn clusters(&self, docs: &[KnowledgeDocument]) -> Vec<Vec<usize>> {
        let threshold = self.config.cluster_similarity_threshold;
        let mut assigned = vec![false; docs.len()];
        let mut out = Vec::new();
        for i in 0..docs.len() {
            if assigned[i] {
                continue;
            }
            assigned[i] = true;
            let mut group = vec![i];
            for j in (i + 1)..docs.len() {
                if !assigned[j] && jaccard(&docs[i].tags, &docs[j].tags) >= threshold {
                    assigned[j] = true;
                    group.push(j);
                }
            }
            if group.len() >= 2 {
                out.push(group);
            }
        }
        out
    }

    /// True when an existing synthesis document already links every member
    /// and is at least as new as the newest of them.
    fn already_covered(
        &self,
        members: &[KnowledgeDocument],
        synth_docs: &[KnowledgeDocument],
    ) -> bool {
        let Some(newest) = members.iter().map(|d| d.modified_at).max() else {
            return false;
        };
        synth_docs.iter().any(|s| {
            s.modified_at >= newest && members.iter().all(|m| s.links.contains(&m.id))
        })
    }

    fn run_job(
        &self,
        job: &mut SynthesisJob,
        members: &[KnowledgeDocument],
    ) -> Result<(), CoreError> {
        job.state = SynthesisState::Running;

        // Extraction failures exclude the document, not the cluster.
        let mut usable: Vec<(&KnowledgeDocument, Vec<Claim>)> = Vec::new();
        for doc in members {
            match self.extractor.extract(doc) {
                Ok(claims) => usable.push((doc, claims)),
                Err(err) => {
                    warn!(doc_id = %doc.id, error = %err, "excluding document from cluster");
                }
            }
        }
        if usable.len() < 2 {
            job.state = SynthesisState::Failed;
            job.failure = Some("insufficient_input".to_string());
            warn!(job_id = %job.id, "cluster unviable after exclusions");
            return Ok(());
        }

        // Group claim occurrences by (subject, predicate), newest document
        // first.
        let mut by_key: BTreeMap<(String, String), Vec<(String, Uuid)>> = BTreeMap::new();
        for (doc, claims) in &usable {
            for claim in claims {
                by_key
                    .entry((claim.subject.clone(), claim.predicate.clone()))
                    .or_default()
                    .push((claim.value.clone(), doc.id));
            }
        }

        let mut findings: Vec<Claim> = Vec::new();
        for ((subject, predicate), occurrences) in &by_key {
            // Distinct values in order of first (most recent) assertion.
            let mut distinct: Vec<(String, Uuid)> = Vec::new();
            for (value, doc_id) in occurrences {
                if !distinct.iter().any(|(v, _)| v == value) {
                    distinct.push((value.clone(), *doc_id));
                }
            }
            if distinct.len() == 1 {
                findings.push(Claim {
                    subject: subject.clone(),
                    predicate: predicate.clone(),
                    value: distinct[0].0.clone(),
                });
            } else {
                for i in 0..distinct.len() {
                    for j in (i + 1)..distinct.len() {
                        let (value_a, doc_a) = &distinct[i];
                        let (value_b, doc_b) = &distinct[j];
                        job.contradictions.push(Contradiction {
                            doc_a: *doc_a,
                            doc_b: *doc_b,
                            subject: subject.clone(),
                            predicate: predicate.clone(),
                            value_a: value_a.clone(),
                            value_b: value_b.clone(),
                            description: format!(
                                "{subject} / {predicate}: '{value_a}' vs '{value_b}'"
                            ),
                        });
                    }
                }
            }
        }

        let primary = usable[0].0;
        let tags = members
            .iter()
            .flat_map(|d| d.tags.iter().cloned())
            .collect();
        let body = compose_body(&primary.topic, &findings, &job.contradictions, members);

        let output = self.store.write(WriteRequest {
            doc_id: None,
            topic: format!("{}-synthesis", primary.topic),
            tags,
            body,
            base_version: 0,
            author: SYNTHESIS_AUTHOR.to_string(),
            diff_summary: format!("synthesized from {} documents", usable.len()),
            synthesized: true,
        })?;

        // Edge inserts are independent and best-effort; a failed link does
        // not roll back the committed document.
        for member in members {
            if let Err(err) = self.store.link(output.id, member.id, EdgeKind::RelatesTo) {
                warn!(from = %output.id, to = %member.id, error = %err, "link insert failed");
            }
        }
        for c in &job.contradictions {
            if let Err(err) = self.store.link(c.doc_a, c.doc_b, EdgeKind::Contradicts) {
                warn!(from = %c.doc_a, to = %c.doc_b, error = %err, "contradiction link failed");
            }
        }

        job.output_doc = Some(output.id);
        job.state = SynthesisState::Completed;
        info!(
            job_id = %job.id,
            output_doc = %output.id,
            findings = findings.len(),
            contradictions = job.contradictions.len(),
            "synthesis job completed"
        );
        Ok(())
    }
}

/// Renders the derived document. Findings keep the claim line format so the
/// output remains machine-extractable; the contradictions section uses a
/// different separator so unresolved conflicts are never re-parsed as
/// asserted claims.
fn compose_body(
    topic: &str,
    findings: &[Claim],
    contradictions: &[Contradiction],
    sources: &[KnowledgeDocument],
) -> String {
    let mut body = format!("# Synthesis: {topic}\n\n## Findings\n\n");
    for claim in findings {
        body.push_str(&format!(
            "- {} :: {} :: {}\n",
            claim.subject, claim.predicate, claim.value
        ));
    }
    if findings.is_empty() {
        body.push_str("(none)\n");
    }

    body.push_str("\n## Unresolved Contradictions\n\n");
    if contradictions.is_empty() {
        body.push_str("(none)\n");
    } else {
        for c in contradictions {
            body.push_str(&format!(
                "- {} / {}: '{}' (doc {}) vs '{}' (doc {})\n",
                c.subject, c.predicate, c.value_a, c.doc_a, c.value_b, c.doc_b
            ));
        }
    }

    body.push_str("\n## Sources\n\n");
    for doc in sources {
        body.push_str(&format!("- {} ({}, v{})\n", doc.id, doc.topic, doc.version));
    }
    body
}
