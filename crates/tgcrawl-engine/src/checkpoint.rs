//! Durable checkpoints of frontier + dedup state.
//!
//! A single versioned JSON blob, written atomically (temp file + rename)
//! so a crash mid-write leaves the previous snapshot intact. Snapshots are
//! taken on a fixed interval and on shutdown; dequeues are paused for the
//! brief serialization window, fetch completions are not. Consumed only at
//! process start, before any seed is accepted.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use tgcrawl_core::{CrawlError, CrawlResult, EntityRef};

use crate::dedup::DedupIndex;
use crate::frontier::{FrontierQueue, FrontierSnapshot};

/// Current snapshot format version. Bump on incompatible schema changes.
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub dedup: Vec<EntityRef>,
    pub frontier: FrontierSnapshot,
    /// High-water mark: entities committed so far.
    pub committed: u64,
}

pub struct CheckpointManager {
    path: PathBuf,
}

impl CheckpointManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot, if one exists. A snapshot with an unknown format
    /// version is an error, not a silent cold start.
    pub fn load(&self) -> CrawlResult<Option<Checkpoint>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CrawlError::Checkpoint(format!("read failed: {e}"))),
        };
        let checkpoint: Checkpoint = serde_json::from_str(&raw)
            .map_err(|e| CrawlError::Checkpoint(format!("corrupt snapshot: {e}")))?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(CrawlError::Checkpoint(format!(
                "unsupported snapshot version {} (expected {})",
                checkpoint.version, CHECKPOINT_VERSION
            )));
        }
        Ok(Some(checkpoint))
    }

    /// Serialize the current frontier + dedup state and persist it.
    ///
    /// Dequeues are paused only while the in-memory state is copied out;
    /// the file write happens after resume.
    pub fn snapshot(
        &self,
        frontier: &FrontierQueue,
        dedup: &DedupIndex,
        committed: u64,
    ) -> CrawlResult<()> {
        frontier.pause();
        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            created_at: Utc::now(),
            dedup: dedup.snapshot(),
            frontier: frontier.snapshot(),
            committed,
        };
        frontier.resume();

        self.store(&checkpoint)?;
        info!(
            path = %self.path.display(),
            frontier = checkpoint.frontier.tasks.len(),
            dedup = checkpoint.dedup.len(),
            "checkpoint written"
        );
        Ok(())
    }

    fn store(&self, checkpoint: &Checkpoint) -> CrawlResult<()> {
        let json = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| CrawlError::Checkpoint(format!("serialize failed: {e}")))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &json)
            .map_err(|e| CrawlError::Checkpoint(format!("write failed: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| CrawlError::Checkpoint(format!("rename failed: {e}")))?;
        Ok(())
    }
}
