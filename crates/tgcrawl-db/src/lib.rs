//! Relational store for crawled entities.
//!
//! SQLite holds the structured records: one row per `(kind, external_id)`,
//! stub rows for edge endpoints not yet fetched, the relational copy of
//! discovered edges (the source of truth the reconcile pass re-derives
//! graph edges from), and the operator dead-letter table.

pub mod migrations;
pub mod pool;
pub mod queries;

pub use pool::{DbError, DbPool, DbResult};
