//! Store seams for the coordinator.
//!
//! The coordinator talks to both stores through these traits so that the
//! commit protocol can be exercised against scripted fault-injecting
//! implementations in tests. The production implementations delegate to
//! `tgcrawl-db` and `tgcrawl-graph`.

use std::sync::Arc;

use async_trait::async_trait;

use tgcrawl_core::{
    CrawlError, CrawlResult, Edge, EdgeKind, EntityKind, EntityRecord, EntityRef,
};
use tgcrawl_db::{queries, DbPool};
use tgcrawl_graph::GraphClient;

/// The relational side of the dual store.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Upsert a fetched entity keyed on `(kind, external_id)`.
    ///
    /// Returns [`CrawlError::EntityConflict`] when the same external id is
    /// already stored under a different kind.
    async fn upsert_entity(&self, record: &EntityRecord) -> CrawlResult<()>;

    /// Insert-if-absent placeholder for an unfetched edge endpoint.
    /// Returns `true` when a new stub row was created.
    async fn ensure_stub(&self, entity: &EntityRef) -> CrawlResult<bool>;

    /// Record a discovered edge relationally. Returns `true` on first insert.
    async fn record_edge(&self, edge: &Edge) -> CrawlResult<bool>;

    async fn mark_committed(&self, entity: &EntityRef) -> CrawlResult<()>;

    async fn mark_failed(&self, entity: &EntityRef) -> CrawlResult<()>;

    /// All committed `(kind, external_id)` pairs, for dedup hydration.
    async fn committed_refs(&self) -> CrawlResult<Vec<EntityRef>>;

    /// All recorded edges, for the reconcile pass.
    async fn stored_edges(&self) -> CrawlResult<Vec<Edge>>;

    async fn add_dead_letter(
        &self,
        entity: &EntityRef,
        cause: &str,
        retries: u32,
    ) -> CrawlResult<()>;
}

/// The graph side of the dual store.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Idempotent upsert keyed on `(source, target, edge type)`.
    async fn upsert_edge(&self, edge: &Edge) -> CrawlResult<()>;
}

/// Production relational store over SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn store_err(e: tgcrawl_db::DbError) -> CrawlError {
    CrawlError::transient_store(e)
}

#[async_trait]
impl RelationalStore for SqliteStore {
    async fn upsert_entity(&self, record: &EntityRecord) -> CrawlResult<()> {
        let fetched_kind = record.kind();
        if let Some(stored) =
            queries::entities::kind_of(&self.pool, &record.external_id).map_err(store_err)?
        {
            if stored != fetched_kind.as_str() {
                return Err(CrawlError::EntityConflict {
                    external_id: record.external_id.clone(),
                    stored,
                    fetched: fetched_kind.as_str().to_string(),
                });
            }
        }
        queries::entities::upsert_entity(&self.pool, record).map_err(store_err)
    }

    async fn ensure_stub(&self, entity: &EntityRef) -> CrawlResult<bool> {
        queries::entities::ensure_stub(&self.pool, entity.kind.as_str(), &entity.external_id)
            .map_err(store_err)
    }

    async fn record_edge(&self, edge: &Edge) -> CrawlResult<bool> {
        queries::entities::insert_edge(&self.pool, edge).map_err(store_err)
    }

    async fn mark_committed(&self, entity: &EntityRef) -> CrawlResult<()> {
        queries::entities::mark_committed(&self.pool, entity.kind.as_str(), &entity.external_id)
            .map_err(store_err)
    }

    async fn mark_failed(&self, entity: &EntityRef) -> CrawlResult<()> {
        queries::entities::mark_failed(&self.pool, entity.kind.as_str(), &entity.external_id)
            .map_err(store_err)
    }

    async fn committed_refs(&self) -> CrawlResult<Vec<EntityRef>> {
        let rows = queries::entities::list_committed(&self.pool).map_err(store_err)?;
        rows.into_iter()
            .map(|(kind, id)| Ok(EntityRef::new(EntityKind::parse(&kind)?, id)))
            .collect()
    }

    async fn stored_edges(&self) -> CrawlResult<Vec<Edge>> {
        let rows = queries::entities::list_edges(&self.pool).map_err(store_err)?;
        rows.into_iter()
            .map(|row| {
                Ok(Edge::new(
                    EntityRef::new(EntityKind::parse(&row.source_kind)?, row.source_id),
                    EntityRef::new(EntityKind::parse(&row.target_kind)?, row.target_id),
                    EdgeKind::parse(&row.kind)?,
                ))
            })
            .collect()
    }

    async fn add_dead_letter(
        &self,
        entity: &EntityRef,
        cause: &str,
        retries: u32,
    ) -> CrawlResult<()> {
        queries::dead_letter::insert_dead_letter(
            &self.pool,
            entity.kind.as_str(),
            &entity.external_id,
            cause,
            retries,
        )
        .map_err(store_err)
    }
}

/// Production graph store over Neo4j.
#[derive(Clone)]
pub struct Neo4jGraphStore {
    client: GraphClient,
}

impl Neo4jGraphStore {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn upsert_edge(&self, edge: &Edge) -> CrawlResult<()> {
        tgcrawl_graph::edges::upsert_edge(&self.client, edge)
            .await
            .map_err(CrawlError::transient_store)
    }
}

/// Convenience boxing helpers used by the CLI wiring.
pub fn relational(pool: DbPool) -> Arc<dyn RelationalStore> {
    Arc::new(SqliteStore::new(pool))
}

pub fn graph(client: GraphClient) -> Arc<dyn GraphStore> {
    Arc::new(Neo4jGraphStore::new(client))
}
