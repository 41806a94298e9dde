//! Shared test doubles: an in-memory SQLite store, a scripted graph store,
//! a fault-injecting relational wrapper, and a scripted fetcher.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use tgcrawl_core::entity::{ChannelPayload, EntityPayload, UserPayload};
use tgcrawl_core::{
    CrawlError, CrawlResult, Edge, EdgeKind, EntityKind, EntityRecord, EntityRef,
};
use tgcrawl_db::{migrations, queries, DbPool};

use crate::fetcher::{FetchedEntity, Fetcher};
use crate::stores::{GraphStore, RelationalStore, SqliteStore};

pub fn sqlite_store() -> Arc<SqliteStore> {
    let pool = DbPool::in_memory().unwrap();
    migrations::run_migrations(&pool).unwrap();
    Arc::new(SqliteStore::new(pool))
}

pub fn chan_ref(id: &str) -> EntityRef {
    EntityRef::new(EntityKind::Channel, id)
}

pub fn user_ref(id: &str) -> EntityRef {
    EntityRef::new(EntityKind::User, id)
}

/// A channel entity whose edges point at the given users.
pub fn channel_fetch(id: &str, member_edges: &[(&str, &str)]) -> FetchedEntity {
    let record = EntityRecord::new(
        id,
        EntityPayload::Channel(ChannelPayload {
            name: format!("channel {id}"),
            link: format!("https://t.me/{id}"),
            subscribers: Some(1_000),
            verified: false,
            created_at: None,
        }),
    );
    let edges = member_edges
        .iter()
        .map(|(target, kind)| {
            Edge::new(
                chan_ref(id),
                user_ref(target),
                EdgeKind::parse(kind).unwrap(),
            )
        })
        .collect();
    FetchedEntity { record, edges }
}

pub fn user_fetch(id: &str) -> FetchedEntity {
    FetchedEntity {
        record: EntityRecord::new(
            id,
            EntityPayload::User(UserPayload {
                username: format!("@{id}"),
                display_name: None,
            }),
        ),
        edges: Vec::new(),
    }
}

/// A channel whose edge points at another channel (for cycle tests).
pub fn channel_fetch_linking(id: &str, other: &str) -> FetchedEntity {
    let mut fetched = channel_fetch(id, &[]);
    fetched.edges.push(Edge::new(
        chan_ref(id),
        chan_ref(other),
        EdgeKind::SimilarTo,
    ));
    fetched
}

/// Scripted graph store. Optionally verifies, on every edge write, that
/// both endpoints already exist in a relational pool.
pub struct MockGraph {
    edges: Mutex<HashSet<(String, String, String)>>,
    fail_remaining: AtomicU32,
    verify_pool: Option<DbPool>,
    violated: AtomicBool,
}

impl MockGraph {
    fn with_pool(verify_pool: Option<DbPool>) -> Arc<Self> {
        Arc::new(Self {
            edges: Mutex::new(HashSet::new()),
            fail_remaining: AtomicU32::new(0),
            verify_pool,
            violated: AtomicBool::new(false),
        })
    }

    /// Fail the next `n` edge writes with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.fail_remaining.store(0, Ordering::SeqCst);
    }

    pub fn edge_count(&self) -> usize {
        self.edges.lock().unwrap().len()
    }

    pub fn has_edge(&self, source: &str, target: &str, kind: &str) -> bool {
        self.edges.lock().unwrap().contains(&(
            source.to_string(),
            target.to_string(),
            kind.to_string(),
        ))
    }

    pub fn precondition_violated(&self) -> bool {
        self.violated.load(Ordering::SeqCst)
    }
}

pub fn mock_graph() -> Arc<MockGraph> {
    MockGraph::with_pool(None)
}

/// A graph mock that asserts the referential precondition against the
/// given relational store on every write.
pub fn verifying_graph(store: Arc<SqliteStore>) -> Arc<MockGraph> {
    MockGraph::with_pool(Some(store.pool().clone()))
}

#[async_trait]
impl GraphStore for MockGraph {
    async fn upsert_edge(&self, edge: &Edge) -> CrawlResult<()> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining
                .store(remaining.saturating_sub(1), Ordering::SeqCst);
            return Err(CrawlError::transient_store("injected graph failure"));
        }

        if let Some(pool) = &self.verify_pool {
            for endpoint in [&edge.source, &edge.target] {
                let row = queries::entities::get_entity(
                    pool,
                    endpoint.kind.as_str(),
                    &endpoint.external_id,
                )
                .unwrap();
                if row.is_none() {
                    self.violated.store(true, Ordering::SeqCst);
                }
            }
        }

        self.edges.lock().unwrap().insert((
            edge.source.external_id.clone(),
            edge.target.external_id.clone(),
            edge.kind.rel_type().to_string(),
        ));
        Ok(())
    }
}

/// Wraps a real store but fails the first `n` stub inserts transiently.
pub struct FlakyStubStore {
    inner: Arc<SqliteStore>,
    stub_failures: AtomicU32,
}

pub fn flaky_stub_store(inner: Arc<SqliteStore>, failures: u32) -> Arc<FlakyStubStore> {
    Arc::new(FlakyStubStore {
        inner,
        stub_failures: AtomicU32::new(failures),
    })
}

#[async_trait]
impl RelationalStore for FlakyStubStore {
    async fn upsert_entity(&self, record: &EntityRecord) -> CrawlResult<()> {
        self.inner.upsert_entity(record).await
    }

    async fn ensure_stub(&self, entity: &EntityRef) -> CrawlResult<bool> {
        let remaining = self.stub_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.stub_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(CrawlError::transient_store("injected stub delay"));
        }
        self.inner.ensure_stub(entity).await
    }

    async fn record_edge(&self, edge: &Edge) -> CrawlResult<bool> {
        self.inner.record_edge(edge).await
    }

    async fn mark_committed(&self, entity: &EntityRef) -> CrawlResult<()> {
        self.inner.mark_committed(entity).await
    }

    async fn mark_failed(&self, entity: &EntityRef) -> CrawlResult<()> {
        self.inner.mark_failed(entity).await
    }

    async fn committed_refs(&self) -> CrawlResult<Vec<EntityRef>> {
        self.inner.committed_refs().await
    }

    async fn stored_edges(&self) -> CrawlResult<Vec<Edge>> {
        self.inner.stored_edges().await
    }

    async fn add_dead_letter(
        &self,
        entity: &EntityRef,
        cause: &str,
        retries: u32,
    ) -> CrawlResult<()> {
        self.inner.add_dead_letter(entity, cause, retries).await
    }
}

/// Scripted fetcher: a map of canned responses plus per-entity transient
/// failure plans; anything unmapped is NotFound. Tracks per-entity fetch
/// counts and the maximum number of simultaneously outstanding calls.
#[derive(Default)]
pub struct MockFetcher {
    entities: Mutex<HashMap<EntityRef, FetchedEntity>>,
    fail_plan: Mutex<HashMap<EntityRef, u32>>,
    counts: Mutex<HashMap<EntityRef, u32>>,
    outstanding: AtomicUsize,
    max_outstanding: AtomicUsize,
    delay: Mutex<Duration>,
}

impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, fetched: FetchedEntity) {
        self.entities
            .lock()
            .unwrap()
            .insert(fetched.record.entity_ref(), fetched);
    }

    pub fn fail_times(&self, entity: EntityRef, times: u32) {
        self.fail_plan.lock().unwrap().insert(entity, times);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn fetch_count(&self, entity: &EntityRef) -> u32 {
        self.counts.lock().unwrap().get(entity).copied().unwrap_or(0)
    }

    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, target: &EntityRef) -> CrawlResult<FetchedEntity> {
        *self
            .counts
            .lock()
            .unwrap()
            .entry(target.clone())
            .or_insert(0) += 1;

        let now = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_outstanding.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.outstanding.fetch_sub(1, Ordering::SeqCst);

        {
            let mut plan = self.fail_plan.lock().unwrap();
            if let Some(remaining) = plan.get_mut(target) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(CrawlError::transient_fetch("injected fetch failure"));
                }
            }
        }

        self.entities
            .lock()
            .unwrap()
            .get(target)
            .cloned()
            .ok_or_else(|| CrawlError::NotFound(target.to_string()))
    }
}
