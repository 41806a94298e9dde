//! Directed, typed relationships between entities.

use serde::{Deserialize, Serialize};

use crate::entity::EntityRef;
use crate::error::{CrawlError, CrawlResult};

/// Relationship types written to the graph store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    MemberOf,
    ForwardedFrom,
    Mentions,
    SimilarTo,
}

impl EdgeKind {
    /// Relationship type name as written in Cypher. Closed set, so it is
    /// safe to splice into a query string.
    pub fn rel_type(&self) -> &'static str {
        match self {
            EdgeKind::MemberOf => "MEMBER_OF",
            EdgeKind::ForwardedFrom => "FORWARDED_FROM",
            EdgeKind::Mentions => "MENTIONS",
            EdgeKind::SimilarTo => "SIMILAR_TO",
        }
    }

    pub fn parse(s: &str) -> CrawlResult<Self> {
        match s {
            "MEMBER_OF" => Ok(EdgeKind::MemberOf),
            "FORWARDED_FROM" => Ok(EdgeKind::ForwardedFrom),
            "MENTIONS" => Ok(EdgeKind::Mentions),
            "SIMILAR_TO" => Ok(EdgeKind::SimilarTo),
            other => Err(CrawlError::MalformedPayload(format!(
                "unknown edge kind: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.rel_type())
    }
}

/// A directed typed edge between two entity references.
///
/// Idempotency key: `(source.external_id, target.external_id, kind)`.
/// Endpoint kinds ride along so that stub rows and frontier tasks for an
/// unseen endpoint know what to create.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: EntityRef,
    pub target: EntityRef,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn new(source: EntityRef, target: EntityRef, kind: EdgeKind) -> Self {
        Self {
            source,
            target,
            kind,
        }
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -[{}]-> {}", self.source, self.kind.rel_type(), self.target)
    }
}
