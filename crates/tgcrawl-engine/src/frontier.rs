//! The frontier queue of discovery work.
//!
//! Three priority tiers (seeds > edge-discovered > retries), FIFO within a
//! tier. Enqueue is idempotent: an identifier that is already visited,
//! queued, or in flight is a no-op, which is what bounds cyclic discovery
//! (A discovers B discovers A).

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use tgcrawl_core::{EntityRef, FrontierTask, Priority};

/// Serializable frontier contents for checkpointing.
///
/// Tasks that were in flight at snapshot time are included at discovered
/// priority so a crash never loses claimed-but-uncommitted work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrontierSnapshot {
    pub tasks: Vec<FrontierTask>,
    pub visited: Vec<EntityRef>,
}

#[derive(Default)]
struct Inner {
    seeds: VecDeque<FrontierTask>,
    discovered: VecDeque<FrontierTask>,
    retries: VecDeque<FrontierTask>,
    /// Identifiers queued or in flight; cleared only on terminal outcome.
    claimed: HashSet<EntityRef>,
    visited: HashSet<EntityRef>,
    paused: bool,
}

impl Inner {
    fn tier(&mut self, priority: Priority) -> &mut VecDeque<FrontierTask> {
        match priority {
            Priority::Seed => &mut self.seeds,
            Priority::Discovered => &mut self.discovered,
            Priority::Retry => &mut self.retries,
        }
    }

    fn queued_len(&self) -> usize {
        self.seeds.len() + self.discovered.len() + self.retries.len()
    }
}

#[derive(Default)]
pub struct FrontierQueue {
    inner: Mutex<Inner>,
}

impl FrontierQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task unless its identifier is already visited, queued, or in
    /// flight. Returns whether the task was accepted.
    pub fn enqueue(&self, task: FrontierTask) -> bool {
        let mut inner = self.lock();
        if inner.visited.contains(&task.entity) || inner.claimed.contains(&task.entity) {
            return false;
        }
        inner.claimed.insert(task.entity.clone());
        let priority = task.priority;
        inner.tier(priority).push_back(task);
        true
    }

    /// Put a claimed task back for another attempt, at retry priority.
    /// Bypasses the idempotent-enqueue filter: the identifier stays claimed
    /// for the whole task lifetime.
    pub fn requeue_retry(&self, task: FrontierTask) {
        let mut inner = self.lock();
        debug_assert!(inner.claimed.contains(&task.entity));
        inner.retries.push_back(FrontierTask {
            priority: Priority::Retry,
            ..task
        });
    }

    /// Next task in priority order; `None` when empty or paused.
    /// The identifier stays claimed until [`mark_visited`](Self::mark_visited).
    pub fn dequeue(&self) -> Option<FrontierTask> {
        let mut inner = self.lock();
        if inner.paused {
            return None;
        }
        inner
            .seeds
            .pop_front()
            .or_else(|| inner.discovered.pop_front())
            .or_else(|| inner.retries.pop_front())
    }

    /// Record the terminal outcome for an identifier. Re-discovery of a
    /// visited identifier is a no-op from then on.
    pub fn mark_visited(&self, entity: &EntityRef) {
        let mut inner = self.lock();
        inner.claimed.remove(entity);
        inner.visited.insert(entity.clone());
    }

    /// Stop handing out tasks while a checkpoint serializes.
    pub fn pause(&self) {
        self.lock().paused = true;
    }

    pub fn resume(&self) {
        self.lock().paused = false;
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queued_len() == 0
    }

    pub fn depth(&self) -> usize {
        self.lock().queued_len()
    }

    pub fn visited_len(&self) -> usize {
        self.lock().visited.len()
    }

    /// Capture queued tasks, in-flight identifiers, and the visited set.
    pub fn snapshot(&self) -> FrontierSnapshot {
        let inner = self.lock();
        let mut tasks: Vec<FrontierTask> = inner
            .seeds
            .iter()
            .chain(inner.discovered.iter())
            .chain(inner.retries.iter())
            .cloned()
            .collect();
        // In-flight identifiers are claimed but in no tier.
        let queued: HashSet<&EntityRef> = tasks.iter().map(|t| &t.entity).collect();
        let in_flight: Vec<FrontierTask> = inner
            .claimed
            .iter()
            .filter(|e| !queued.contains(e))
            .map(|e| FrontierTask::discovered(e.clone()))
            .collect();
        tasks.extend(in_flight);
        FrontierSnapshot {
            tasks,
            visited: inner.visited.iter().cloned().collect(),
        }
    }

    /// Rebuild from a checkpoint. Called at startup before any seeds are
    /// accepted, so resumed tasks outrank newly configured seeds.
    pub fn restore(&self, snapshot: FrontierSnapshot) {
        let mut inner = self.lock();
        inner.visited = snapshot.visited.into_iter().collect();
        for task in snapshot.tasks {
            if inner.visited.contains(&task.entity) || inner.claimed.contains(&task.entity) {
                continue;
            }
            inner.claimed.insert(task.entity.clone());
            let priority = task.priority;
            inner.tier(priority).push_back(task);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Inner holds no user code that can panic while locked.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
