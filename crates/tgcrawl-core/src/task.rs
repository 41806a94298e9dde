//! Frontier task lifecycle types.

use serde::{Deserialize, Serialize};

use crate::entity::{EntityKind, EntityRef};

/// Priority tiers for frontier tasks. Seeds drain before edge-discovered
/// work, which drains before retries; FIFO within a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Seed,
    Discovered,
    Retry,
}

/// An entity identifier awaiting fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierTask {
    pub entity: EntityRef,
    pub priority: Priority,
    pub retries: u32,
}

impl FrontierTask {
    pub fn seed(kind: EntityKind, external_id: impl Into<String>) -> Self {
        Self {
            entity: EntityRef::new(kind, external_id),
            priority: Priority::Seed,
            retries: 0,
        }
    }

    pub fn discovered(entity: EntityRef) -> Self {
        Self {
            entity,
            priority: Priority::Discovered,
            retries: 0,
        }
    }

    /// The same task demoted to the retry tier with its attempt counted.
    pub fn retried(&self) -> Self {
        Self {
            entity: self.entity.clone(),
            priority: Priority::Retry,
            retries: self.retries + 1,
        }
    }
}
