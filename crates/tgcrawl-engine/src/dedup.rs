//! In-memory dedup index of committed entity identities.
//!
//! Every fetched edge endpoint is checked here, so membership must be
//! answerable without a network round trip. Multi-reader, single-writer:
//! only the coordinator appends, on successful commit.

use std::collections::HashSet;
use std::sync::RwLock;

use tgcrawl_core::EntityRef;

#[derive(Default)]
pub struct DedupIndex {
    set: RwLock<HashSet<EntityRef>>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, entity: &EntityRef) -> bool {
        self.set
            .read()
            .map(|s| s.contains(entity))
            .unwrap_or(false)
    }

    /// Record a committed identity. Coordinator-only.
    pub fn record_committed(&self, entity: EntityRef) {
        if let Ok(mut set) = self.set.write() {
            set.insert(entity);
        }
    }

    /// Bulk-load identities from a checkpoint or from the relational store.
    pub fn hydrate(&self, entities: impl IntoIterator<Item = EntityRef>) {
        if let Ok(mut set) = self.set.write() {
            set.extend(entities);
        }
    }

    pub fn snapshot(&self) -> Vec<EntityRef> {
        self.set
            .read()
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.set.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgcrawl_core::EntityKind;

    #[test]
    fn records_and_answers_membership() {
        let index = DedupIndex::new();
        let chan = EntityRef::new(EntityKind::Channel, "chan_1");
        assert!(!index.has(&chan));

        index.record_committed(chan.clone());
        assert!(index.has(&chan));
        // same id under a different kind is a different identity
        assert!(!index.has(&EntityRef::new(EntityKind::User, "chan_1")));
    }

    #[test]
    fn hydrate_then_snapshot_roundtrip() {
        let index = DedupIndex::new();
        index.hydrate(vec![
            EntityRef::new(EntityKind::Channel, "a"),
            EntityRef::new(EntityKind::User, "b"),
        ]);
        assert_eq!(index.len(), 2);

        let snap = index.snapshot();
        let restored = DedupIndex::new();
        restored.hydrate(snap);
        assert!(restored.has(&EntityRef::new(EntityKind::User, "b")));
    }
}
