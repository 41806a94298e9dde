//! Ingestion engine: frontier queue, dedup index, dual-write coordinator,
//! checkpointing, rate governor, and the worker pipeline wiring them up.
//!
//! Data flow: frontier → fetch workers → dedup filter → bounded channel →
//! commit workers → {relational store, graph store}. Edges discovered
//! during a fetch are pushed back onto the frontier as messages, never
//! followed recursively.

pub mod checkpoint;
pub mod coordinator;
pub mod dedup;
pub mod engine;
pub mod fetcher;
pub mod frontier;
pub mod governor;
pub mod reconcile;
pub mod stores;

#[cfg(test)]
pub(crate) mod testing;

pub use checkpoint::{Checkpoint, CheckpointManager, CHECKPOINT_VERSION};
pub use coordinator::{CommitOutcome, CommitStats, Coordinator, RetryPolicy, StatsSnapshot};
pub use dedup::DedupIndex;
pub use engine::{Engine, EngineOptions, IngestContext};
pub use fetcher::{FetchedEntity, Fetcher, HttpFetcher};
pub use frontier::{FrontierQueue, FrontierSnapshot};
pub use governor::{GovernorConfig, RateGovernor};
pub use stores::{GraphStore, Neo4jGraphStore, RelationalStore, SqliteStore};
