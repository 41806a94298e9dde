//! Graph store for discovered relationships.
//!
//! Neo4j holds the traversal side of the dual store: one node per entity
//! (keyed by external id) and one typed relationship per edge. All writes
//! are MERGE-based and idempotent; the relational store is always written
//! first, so the graph can trust that any endpoint it references already
//! exists there at least as a stub.

pub mod client;
pub mod edges;
pub mod schema;

pub use client::{GraphClient, GraphConfig, GraphCounts};
