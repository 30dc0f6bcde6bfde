//! Task classification boundary.
//!
//! The core treats request text as an opaque input: a [`Classifier`] turns
//! it into a topic slug, a domain tag set, and a required-operation set,
//! and nothing downstream looks at the raw text again. The trait is the
//! contract; the keyword implementation below is a deterministic default
//! that embedders replace with whatever scorer they run.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::shared::{Operation, OperationSet};

/// Result of classifying one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Normalized topic slug derived from the request.
    pub topic: String,
    pub domain_tags: BTreeSet<String>,
    pub required_operations: OperationSet,
}

/// Pure request-text scorer. Called exactly once per task; must be free of
/// side effects.
pub trait Classifier: Send + Sync {
    fn classify(&self, request_text: &str) -> Classification;
}

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9][a-z0-9_\-]*").unwrap());

/// Domain cue table: a tag and the lowercase fragments that signal it.
static DOMAIN_CUES: Lazy<Vec<(&'static str, Vec<&'static str>)>> = Lazy::new(|| {
    vec![
        ("react", vec!["react", "jsx", "hooks", "component"]),
        ("rust", vec!["rust", "cargo", "borrow", "crate", "tokio"]),
        ("web", vec!["http", "browser", "css", "frontend", "web"]),
        ("database", vec!["database", "sql", "postgres", "index", "query plan"]),
        ("api", vec!["api", "endpoint", "rest", "grpc", "sdk"]),
        ("ops", vec!["deploy", "docker", "kubernetes", "ci", "pipeline", "server"]),
        ("infra", vec!["infra", "terraform", "cloud", "aws", "provisioning"]),
        ("security", vec!["security", "vulnerability", "cve", "auth", "encryption"]),
        ("testing", vec!["test", "coverage", "flaky", "assertion"]),
        ("notes", vec!["summarize", "summary", "digest", "notes", "recap"]),
    ]
});

/// Operation cue table: fragments that imply a worker needs an operation
/// beyond the baseline read/write pair.
static OPERATION_CUES: Lazy<Vec<(Operation, Vec<&'static str>)>> = Lazy::new(|| {
    vec![
        (
            Operation::FetchExternal,
            vec!["fetch", "online", "latest", "upstream", "download", "web search"],
        ),
        (
            Operation::ExecuteShell,
            vec!["run ", "shell", "command", "execute", "benchmark", "profile"],
        ),
        (
            Operation::EditSource,
            vec!["refactor", "patch", "edit the", "fix the code", "apply change"],
        ),
    ]
});

/// Words dropped when deriving a topic slug.
static STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "for", "to", "in", "on", "and", "or", "about", "into", "how", "what",
    "why", "is", "are", "do", "does", "please", "look", "research",
];

/// Derives a stable topic slug from the leading significant words of a
/// request. Identical requests always slug identically, which is what the
/// dedup path keys on.
pub fn topic_slug(text: &str) -> String {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = WORD
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|w| !STOPWORDS.contains(w))
        .take(6)
        .collect();
    if words.is_empty() {
        "untitled".to_string()
    } else {
        words.join("-")
    }
}

/// Keyword-table classifier. Deterministic, offline, side-effect free.
#[derive(Debug, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, request_text: &str) -> Classification {
        let lowered = request_text.to_lowercase();

        let mut domain_tags = BTreeSet::new();
        for (tag, cues) in DOMAIN_CUES.iter() {
            if cues.iter().any(|cue| lowered.contains(cue)) {
                domain_tags.insert((*tag).to_string());
            }
        }

        // Every research worker reads prior findings and writes new ones.
        let mut required_operations = OperationSet::of(&[Operation::ReadDoc, Operation::WriteDoc]);
        for (op, cues) in OPERATION_CUES.iter() {
            if cues.iter().any(|cue| lowered.contains(cue)) {
                required_operations.insert(*op);
            }
        }

        Classification {
            topic: topic_slug(request_text),
            domain_tags,
            required_operations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_is_stable_and_normalized() {
        assert_eq!(topic_slug("Research React Hooks"), "react-hooks");
        assert_eq!(topic_slug("research react hooks"), "react-hooks");
        assert_eq!(topic_slug("  "), "untitled");
    }

    #[test]
    fn baseline_operations_always_present() {
        let c = KeywordClassifier::new().classify("anything at all");
        assert!(c.required_operations.contains(Operation::ReadDoc));
        assert!(c.required_operations.contains(Operation::WriteDoc));
        assert!(!c.required_operations.contains(Operation::ExecuteShell));
    }

    #[test]
    fn cues_map_to_tags_and_operations() {
        let c = KeywordClassifier::new()
            .classify("fetch the latest react hooks guidance and summarize it");
        assert!(c.domain_tags.contains("react"));
        assert!(c.domain_tags.contains("notes"));
        assert!(c.required_operations.contains(Operation::FetchExternal));
        assert!(!c.required_operations.contains(Operation::EditSource));
    }

    #[test]
    fn identical_requests_classify_identically() {
        let classifier = KeywordClassifier::new();
        let a = classifier.classify("research react hooks");
        let b = classifier.classify("research react hooks");
        assert_eq!(a, b);
    }
}
