//! Cross-link graph over knowledge documents.
//!
//! Edges live in their own trees (forward and reverse indexes) so that
//! outgoing links, in-degree, and reachability are all prefix scans.
//! `RelatesTo` and `Contradicts` edges may form arbitrary cycles; only the
//! `Supersedes` subgraph must stay acyclic, enforced with a bounded
//! reachability check before every insert. A rejected edge leaves the graph
//! untouched.

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::store::KnowledgeStore;
use crate::error::CoreError;

/// Relationship carried by an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Wiki-style cross-reference. Cycles permitted.
    RelatesTo,
    /// The source document replaces the target. Must stay acyclic.
    Supersedes,
    /// The two documents assert conflicting claims.
    Contradicts,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::RelatesTo => "relates_to",
            EdgeKind::Supersedes => "supersedes",
            EdgeKind::Contradicts => "contradicts",
        }
    }
}

/// A directed, typed edge between two documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEdge {
    pub from: Uuid,
    pub to: Uuid,
    pub kind: EdgeKind,
}

impl KnowledgeStore {
    /// Inserts an edge. Re-inserting an existing edge is idempotent.
    ///
    /// A `Supersedes` edge that would close a cycle (including a self-loop)
    /// is rejected with `Cycle` and nothing is written. Both endpoints must
    /// exist.
    pub fn link(&self, from: Uuid, to: Uuid, kind: EdgeKind) -> Result<(), CoreError> {
        self.get_required(from)?;
        self.get_required(to)?;

        if kind == EdgeKind::Supersedes && (from == to || self.supersedes_reaches(to, from)?) {
            return Err(CoreError::Cycle { from, to });
        }

        let edge = KnowledgeEdge { from, to, kind };
        let bytes = serde_json::to_vec(&edge)?;
        self.edges.insert(edge_key(from, to, kind), bytes.clone())?;
        self.edges_rev.insert(edge_key(to, from, kind), bytes)?;
        self.mirror_link(from, to)?;
        // The target gained an incoming edge; its quality depends on it.
        self.refresh_quality(to)?;
        debug!(%from, %to, kind = kind.as_str(), "edge inserted");
        Ok(())
    }

    /// Outgoing edges of `from`, all kinds.
    pub fn edges_from(&self, from: Uuid) -> Result<Vec<KnowledgeEdge>, CoreError> {
        let mut out = Vec::new();
        for entry in self.edges.scan_prefix(node_prefix(from)) {
            let (_, bytes) = entry?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    /// Incoming edges of `to`, all kinds.
    pub fn edges_to(&self, to: Uuid) -> Result<Vec<KnowledgeEdge>, CoreError> {
        let mut out = Vec::new();
        for entry in self.edges_rev.scan_prefix(node_prefix(to)) {
            let (_, bytes) = entry?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    /// Number of incoming edges, all kinds. Feeds the quality score.
    pub fn in_degree(&self, id: Uuid) -> Result<usize, CoreError> {
        Ok(self.edges_rev.scan_prefix(node_prefix(id)).count())
    }

    /// Breadth-first reachability over `Supersedes` edges only. Bounded by
    /// the visited set, so cycles elsewhere in the graph cannot loop it.
    fn supersedes_reaches(&self, start: Uuid, needle: Uuid) -> Result<bool, CoreError> {
        let mut visited: BTreeSet<Uuid> = BTreeSet::new();
        let mut frontier = VecDeque::from([start]);
        while let Some(node) = frontier.pop_front() {
            if node == needle {
                return Ok(true);
            }
            if !visited.insert(node) {
                continue;
            }
            for edge in self.edges_from(node)? {
                if edge.kind == EdgeKind::Supersedes && !visited.contains(&edge.to) {
                    frontier.push_back(edge.to);
                }
            }
        }
        Ok(false)
    }
}

fn edge_key(a: Uuid, b: Uuid, kind: EdgeKind) -> Vec<u8> {
    format!("{}/{}/{}", a.simple(), b.simple(), kind.as_str()).into_bytes()
}

fn node_prefix(node: Uuid) -> Vec<u8> {
    format!("{}/", node.simple()).into_bytes()
}
