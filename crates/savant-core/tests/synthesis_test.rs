//! Integration test: synthesis engine. Covers clustering, contradiction
//! surfacing, extractor-failure exclusion, and synthesis dedup across scan
//! cycles.
//!
//! ## Scenarios
//! 1. Two overlapping documents with a conflicting claim synthesize into a
//!    derived document that surfaces the conflict instead of resolving it.
//! 2. Agreeing claims union into the findings section once.
//! 3. A document with malformed claims is excluded; a cluster left with one
//!    usable document fails with insufficient input.
//! 4. A second scan does not re-synthesize an unchanged cluster.
//! 5. Singletons and dissimilar documents never cluster.

use std::collections::BTreeSet;
use std::sync::Arc;

use savant_core::{
    CoreConfig, EdgeKind, KnowledgeStore, LineClaimExtractor, SynthesisEngine, SynthesisState,
    WriteRequest, SYNTHESIS_AUTHOR,
};

fn tags(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn setup(dir: &tempfile::TempDir) -> (Arc<KnowledgeStore>, SynthesisEngine) {
    let config = CoreConfig::default().with_data_dir(dir.path().join("store"));
    let store = Arc::new(KnowledgeStore::open(&config).expect("store opens"));
    let engine = SynthesisEngine::new(
        Arc::clone(&store),
        Arc::new(LineClaimExtractor::new()),
        config,
    );
    (store, engine)
}

fn seed(store: &KnowledgeStore, topic: &str, tag_names: &[&str], body: &str) -> uuid::Uuid {
    store
        .write(WriteRequest::create(topic, tags(tag_names), body, "seed"))
        .expect("create succeeds")
        .id
}

// ===========================================================================
// Scenario 1: contradiction surfacing
// ===========================================================================

#[test]
fn conflicting_claims_surface_as_contradictions() {
    let dir = tempfile::tempdir().unwrap();
    let (store, engine) = setup(&dir);

    let a = seed(
        &store,
        "react-hooks-overview",
        &["react", "hooks"],
        "- x :: hasValue :: A\n- useEffect :: runs_after :: paint\n",
    );
    std::thread::sleep(std::time::Duration::from_millis(5));
    let b = seed(
        &store,
        "react-hooks-deep-dive",
        &["react", "hooks"],
        "- x :: hasValue :: B\n- useEffect :: runs_after :: paint\n",
    );

    let jobs = engine.run_scan().expect("scan succeeds");
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.state, SynthesisState::Completed);
    assert_eq!(job.input_doc_ids.len(), 2);
    // Inputs are snapshot-sorted newest first.
    assert_eq!(job.input_doc_ids[0], b);

    // The conflicting (subject, predicate) pair is recorded, both values
    // preserved, neither resolved.
    assert_eq!(job.contradictions.len(), 1);
    let c = &job.contradictions[0];
    assert_eq!(c.subject, "x");
    assert_eq!(c.predicate, "hasValue");
    let mut values = vec![c.value_a.as_str(), c.value_b.as_str()];
    values.sort();
    assert_eq!(values, vec!["A", "B"]);
    assert_eq!(
        {
            let mut docs = vec![c.doc_a, c.doc_b];
            docs.sort();
            docs
        },
        {
            let mut docs = vec![a, b];
            docs.sort();
            docs
        }
    );

    // The output body never asserts an unqualified value for the pair.
    let output = store.get(job.output_doc.unwrap()).unwrap().unwrap();
    assert!(output.synthesized);
    assert_eq!(output.version, 1);
    assert!(!output.body.contains("x :: hasValue"));
    assert!(output.body.contains("Unresolved Contradictions"));
    assert!(output.body.contains("'A'") && output.body.contains("'B'"));

    // Synthesis augments its sources: RelatesTo edges to every input.
    let outgoing = store.edges_from(output.id).unwrap();
    assert_eq!(outgoing.len(), 2);
    assert!(outgoing.iter().all(|e| e.kind == EdgeKind::RelatesTo));

    // The conflicting pair is also cross-linked as Contradicts.
    let contradiction_edge = store
        .edges_from(b)
        .unwrap()
        .iter()
        .any(|e| e.to == a && e.kind == EdgeKind::Contradicts)
        || store
            .edges_from(a)
            .unwrap()
            .iter()
            .any(|e| e.to == b && e.kind == EdgeKind::Contradicts);
    assert!(contradiction_edge);

    let revisions = store.revisions(output.id).unwrap();
    assert_eq!(revisions[0].author, SYNTHESIS_AUTHOR);
}

// ===========================================================================
// Scenario 2: agreeing claims union once
// ===========================================================================

#[test]
fn agreeing_claims_union_into_findings() {
    let dir = tempfile::tempdir().unwrap();
    let (store, engine) = setup(&dir);

    seed(
        &store,
        "rust-async-overview",
        &["rust", "async"],
        "- tokio :: provides :: runtime\n- spawn :: returns :: join_handle\n",
    );
    seed(
        &store,
        "rust-async-patterns",
        &["rust", "async"],
        "- tokio :: provides :: runtime\n- select :: races :: futures\n",
    );

    let jobs = engine.run_scan().unwrap();
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert!(job.contradictions.is_empty());

    let output = store.get(job.output_doc.unwrap()).unwrap().unwrap();
    assert_eq!(output.body.matches("tokio :: provides :: runtime").count(), 1);
    assert!(output.body.contains("spawn :: returns :: join_handle"));
    assert!(output.body.contains("select :: races :: futures"));
    assert!(output.tags.contains("rust") && output.tags.contains("async"));
}

// ===========================================================================
// Scenario 3: extractor failure excludes only the document
// ===========================================================================

#[test]
fn malformed_document_is_excluded_and_small_cluster_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (store, engine) = setup(&dir);

    seed(
        &store,
        "db-indexing-a",
        &["database", "index"],
        "- btree :: default_for :: postgres\n",
    );
    // Malformed claim line: separator present, only two fields.
    seed(&store, "db-indexing-b", &["database", "index"], "broken :: line\n");

    let jobs = engine.run_scan().unwrap();
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.state, SynthesisState::Failed);
    assert_eq!(job.failure.as_deref(), Some("insufficient_input"));
    assert!(job.output_doc.is_none());

    // Nothing was committed for the failed job.
    assert_eq!(store.all_documents().unwrap().len(), 2);
}

// ===========================================================================
// Scenario 4: unchanged clusters are not re-synthesized
// ===========================================================================

#[test]
fn second_scan_skips_covered_cluster() {
    let dir = tempfile::tempdir().unwrap();
    let (store, engine) = setup(&dir);

    seed(&store, "react-state-a", &["react", "state"], "- s :: p :: v\n");
    seed(&store, "react-state-b", &["react", "state"], "- s :: p :: v\n");

    let first = engine.run_scan().unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].state, SynthesisState::Completed);

    let second = engine.run_scan().unwrap();
    assert!(second.is_empty(), "unchanged cluster is covered by the existing synthesis");

    // A fresh write to a member re-opens the cluster on the next scan.
    let member = first[0].input_doc_ids[0];
    let current = store.get(member).unwrap().unwrap();
    store
        .write(WriteRequest::update(member, current.version, "- s :: p :: v2\n", "seed", "revised"))
        .unwrap();
    let third = engine.run_scan().unwrap();
    assert_eq!(third.len(), 1);
}

// ===========================================================================
// Scenario 5: clustering boundaries
// ===========================================================================

#[test]
fn singletons_and_dissimilar_documents_do_not_cluster() {
    let dir = tempfile::tempdir().unwrap();
    let (store, engine) = setup(&dir);

    seed(&store, "lonely-topic", &["unique"], "- a :: b :: c\n");
    seed(&store, "other-topic", &["different", "tags", "entirely"], "- d :: e :: f\n");

    let jobs = engine.run_scan().unwrap();
    assert!(jobs.is_empty());
    assert_eq!(store.all_documents().unwrap().len(), 2);
}
