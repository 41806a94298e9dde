//! Core domain model for the tgcrawl ingestion pipeline.
//!
//! Defines the entities and edges discovered on the platform, the frontier
//! task lifecycle, the error taxonomy shared by every stage, and process
//! configuration. No I/O lives here.

pub mod config;
pub mod edge;
pub mod entity;
pub mod error;
pub mod task;

pub use config::CrawlConfig;
pub use edge::{Edge, EdgeKind};
pub use entity::{CommitStatus, EntityKind, EntityPayload, EntityRecord, EntityRef};
pub use error::{CrawlError, CrawlResult};
pub use task::{FrontierTask, Priority};
