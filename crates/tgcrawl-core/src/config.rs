//! Process configuration: TOML file with environment overrides.
//!
//! Credentials and endpoints come from the environment when set
//! (`TGCRAWL_DB_PATH`, `TGCRAWL_API_BASE`, `NEO4J_URI`, `NEO4J_USER`,
//! `NEO4J_PASSWORD`); everything else from the config file, with
//! defaults suitable for local development.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::entity::{EntityKind, EntityRef};
use crate::error::{CrawlError, CrawlResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// SQLite database path. `:memory:` is accepted for throwaway runs.
    pub db_path: PathBuf,
    /// Base URL of the platform gateway the fetcher talks to.
    pub api_base: String,
    /// Seed identifiers, `kind:external_id` (e.g. `channel:chan_1`).
    pub seeds: Vec<String>,
    pub graph: GraphSection,
    pub workers: WorkerSection,
    pub rate: RateSection,
    pub retry: RetrySection,
    pub checkpoint: CheckpointSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphSection {
    pub uri: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub fetch_workers: usize,
    pub commit_workers: usize,
    /// Capacity of the fetch→commit channel; bounds inter-stage buffering.
    pub channel_capacity: usize,
    /// Seconds granted to in-flight commits on shutdown.
    pub grace_secs: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RateSection {
    pub requests_per_sec: f64,
    pub burst: u32,
    /// Upper bound on concurrent fetches.
    pub max_concurrency: usize,
    /// Floor below which backpressure never narrows concurrency.
    pub min_concurrency: usize,
    /// p99 commit latency (ms) above which fetch concurrency narrows.
    pub p99_threshold_ms: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Attempts per store stage before a task re-queues at retry priority.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Re-queues of a whole task before it is dead-lettered.
    pub max_task_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckpointSection {
    pub path: PathBuf,
    pub interval_secs: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("tgcrawl.db"),
            api_base: "http://localhost:8085".to_string(),
            seeds: Vec::new(),
            graph: GraphSection::default(),
            workers: WorkerSection::default(),
            rate: RateSection::default(),
            retry: RetrySection::default(),
            checkpoint: CheckpointSection::default(),
        }
    }
}

impl Default for GraphSection {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "password".to_string(),
        }
    }
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            fetch_workers: 4,
            commit_workers: 2,
            channel_capacity: 32,
            grace_secs: 10,
        }
    }
}

impl Default for RateSection {
    fn default() -> Self {
        Self {
            requests_per_sec: 2.0,
            burst: 5,
            max_concurrency: 5,
            min_concurrency: 1,
            p99_threshold_ms: 2_000,
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 200,
            max_backoff_ms: 10_000,
            max_task_retries: 5,
        }
    }
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tgcrawl.checkpoint.json"),
            interval_secs: 30,
        }
    }
}

impl CrawlConfig {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> CrawlResult<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)?;
                toml::from_str(&raw)
                    .map_err(|e| CrawlError::Config(format!("{}: {e}", p.display())))?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("TGCRAWL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("TGCRAWL_API_BASE") {
            self.api_base = v;
        }
        if let Ok(v) = std::env::var("NEO4J_URI") {
            self.graph.uri = v;
        }
        if let Ok(v) = std::env::var("NEO4J_USER") {
            self.graph.user = v;
        }
        if let Ok(v) = std::env::var("NEO4J_PASSWORD") {
            self.graph.password = v;
        }
    }

    /// Parse the configured `kind:id` seed strings.
    pub fn seed_refs(&self) -> CrawlResult<Vec<EntityRef>> {
        self.seeds.iter().map(|s| parse_seed(s)).collect()
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint.interval_secs)
    }

    pub fn grace_deadline(&self) -> Duration {
        Duration::from_secs(self.workers.grace_secs)
    }
}

/// Parse a `kind:id` seed string into an [`EntityRef`].
pub fn parse_seed(s: &str) -> CrawlResult<EntityRef> {
    let (kind, id) = s
        .split_once(':')
        .ok_or_else(|| CrawlError::Config(format!("seed '{s}' is not 'kind:id'")))?;
    if id.is_empty() {
        return Err(CrawlError::Config(format!("seed '{s}' has an empty id")));
    }
    let kind = EntityKind::parse(kind)
        .map_err(|_| CrawlError::Config(format!("seed '{s}' has unknown kind '{kind}'")))?;
    Ok(EntityRef::new(kind, id))
}
