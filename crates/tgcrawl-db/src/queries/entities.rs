//! Entity and edge queries.
//!
//! All writes are keyed on the `(kind, external_id)` uniqueness invariant:
//! a retried upsert overwrites in place and can never create a second row.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use tgcrawl_core::{Edge, EntityRecord};

use crate::pool::{DbPool, DbResult};

/// Entity row from the database.
#[derive(Debug, Clone)]
pub struct EntityRow {
    pub kind: String,
    pub external_id: String,
    pub payload: Option<String>,
    pub resolved: bool,
    pub status: String,
    pub discovered_at: String,
    pub updated_at: String,
}

/// Edge row from the database.
#[derive(Debug, Clone)]
pub struct EdgeRow {
    pub source_kind: String,
    pub source_id: String,
    pub target_kind: String,
    pub target_id: String,
    pub kind: String,
}

/// Aggregate counts for the status display.
#[derive(Debug, Clone, Default)]
pub struct StoreCounts {
    pub entities: i64,
    pub committed: i64,
    pub stubs: i64,
    pub edges: i64,
    pub dead_letters: i64,
}

/// Upsert a fully fetched entity, resolving any pre-existing stub.
///
/// The row is left in `pending` status; [`mark_committed`] flips it only
/// after the graph-store stage has succeeded.
pub fn upsert_entity(pool: &DbPool, record: &EntityRecord) -> DbResult<()> {
    let payload = serde_json::to_string(&record.payload)?;
    let now = Utc::now().to_rfc3339();
    pool.with_conn(|conn| {
        conn.execute(
            "INSERT INTO entities (kind, external_id, payload, resolved, status, discovered_at, updated_at)
             VALUES (?1, ?2, ?3, 1, 'pending', ?4, ?5)
             ON CONFLICT (kind, external_id) DO UPDATE SET
                 payload = excluded.payload,
                 resolved = 1,
                 updated_at = excluded.updated_at",
            params![
                record.kind().as_str(),
                record.external_id,
                payload,
                record.discovered_at.to_rfc3339(),
                now,
            ],
        )?;
        Ok(())
    })
}

/// Insert a placeholder row for an edge endpoint that has not been fetched
/// yet. A no-op (returning `false`) when any row, stub or real, already
/// exists.
pub fn ensure_stub(pool: &DbPool, kind: &str, external_id: &str) -> DbResult<bool> {
    let now = Utc::now().to_rfc3339();
    pool.with_conn(|conn| {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO entities (kind, external_id, payload, resolved, status, discovered_at, updated_at)
             VALUES (?1, ?2, NULL, 0, 'pending', ?3, ?3)",
            params![kind, external_id, now],
        )?;
        Ok(inserted > 0)
    })
}

/// Record a discovered edge relationally. Returns `false` when the edge was
/// already present.
pub fn insert_edge(pool: &DbPool, edge: &Edge) -> DbResult<bool> {
    let now = Utc::now().to_rfc3339();
    pool.with_conn(|conn| {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO edges (source_kind, source_id, target_kind, target_id, kind, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                edge.source.kind.as_str(),
                edge.source.external_id,
                edge.target.kind.as_str(),
                edge.target.external_id,
                edge.kind.rel_type(),
                now,
            ],
        )?;
        Ok(inserted > 0)
    })
}

/// Flip an entity row to `committed` after the graph stage succeeded.
pub fn mark_committed(pool: &DbPool, kind: &str, external_id: &str) -> DbResult<()> {
    set_status(pool, kind, external_id, "committed")
}

/// Flip an entity row to `failed` when its task is dead-lettered.
pub fn mark_failed(pool: &DbPool, kind: &str, external_id: &str) -> DbResult<()> {
    set_status(pool, kind, external_id, "failed")
}

fn set_status(pool: &DbPool, kind: &str, external_id: &str, status: &str) -> DbResult<()> {
    let now = Utc::now().to_rfc3339();
    pool.with_conn(|conn| {
        conn.execute(
            "UPDATE entities SET status = ?1, updated_at = ?2 WHERE kind = ?3 AND external_id = ?4",
            params![status, now, kind, external_id],
        )?;
        Ok(())
    })
}

/// The stored kind for an external id, if any row exists. Used to detect
/// same-id-different-kind conflicts before upserting.
pub fn kind_of(pool: &DbPool, external_id: &str) -> DbResult<Option<String>> {
    pool.with_conn(|conn| {
        let kind = conn
            .query_row(
                "SELECT kind FROM entities WHERE external_id = ?1 LIMIT 1",
                params![external_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(kind)
    })
}

pub fn get_entity(pool: &DbPool, kind: &str, external_id: &str) -> DbResult<Option<EntityRow>> {
    pool.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT kind, external_id, payload, resolved, status, discovered_at, updated_at
                 FROM entities WHERE kind = ?1 AND external_id = ?2",
                params![kind, external_id],
                |row| {
                    Ok(EntityRow {
                        kind: row.get(0)?,
                        external_id: row.get(1)?,
                        payload: row.get(2)?,
                        resolved: row.get::<_, i64>(3)? != 0,
                        status: row.get(4)?,
                        discovered_at: row.get(5)?,
                        updated_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    })
}

/// All `(kind, external_id)` pairs in `committed` status; hydrates the
/// dedup index when no checkpoint is available.
pub fn list_committed(pool: &DbPool) -> DbResult<Vec<(String, String)>> {
    pool.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT kind, external_id FROM entities WHERE status = 'committed'")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// All recorded edges, for the reconcile pass.
pub fn list_edges(pool: &DbPool) -> DbResult<Vec<EdgeRow>> {
    pool.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT source_kind, source_id, target_kind, target_id, kind FROM edges ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(EdgeRow {
                    source_kind: row.get(0)?,
                    source_id: row.get(1)?,
                    target_kind: row.get(2)?,
                    target_id: row.get(3)?,
                    kind: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn counts(pool: &DbPool) -> DbResult<StoreCounts> {
    pool.with_conn(|conn| {
        let one = |sql: &str| -> rusqlite::Result<i64> { conn.query_row(sql, [], |r| r.get(0)) };
        Ok(StoreCounts {
            entities: one("SELECT COUNT(*) FROM entities")?,
            committed: one("SELECT COUNT(*) FROM entities WHERE status = 'committed'")?,
            stubs: one("SELECT COUNT(*) FROM entities WHERE resolved = 0")?,
            edges: one("SELECT COUNT(*) FROM edges")?,
            dead_letters: one("SELECT COUNT(*) FROM dead_letter")?,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;
    use tgcrawl_core::entity::{ChannelPayload, EntityPayload};
    use tgcrawl_core::{EdgeKind, EntityKind, EntityRef};

    fn test_pool() -> DbPool {
        let pool = DbPool::in_memory().unwrap();
        run_migrations(&pool).unwrap();
        pool
    }

    fn channel_record(id: &str) -> EntityRecord {
        EntityRecord::new(
            id,
            EntityPayload::Channel(ChannelPayload {
                name: format!("channel {id}"),
                link: format!("https://t.me/{id}"),
                subscribers: Some(120),
                verified: false,
                created_at: None,
            }),
        )
    }

    #[test]
    fn upsert_is_idempotent() {
        let pool = test_pool();
        let record = channel_record("chan_1");

        upsert_entity(&pool, &record).unwrap();
        upsert_entity(&pool, &record).unwrap();
        upsert_entity(&pool, &record).unwrap();

        let count: i64 = pool
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM entities WHERE external_id = 'chan_1'",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn stub_is_resolved_by_later_upsert() {
        let pool = test_pool();
        assert!(ensure_stub(&pool, "channel", "chan_2").unwrap());

        let stub = get_entity(&pool, "channel", "chan_2").unwrap().unwrap();
        assert!(!stub.resolved);
        assert!(stub.payload.is_none());

        upsert_entity(&pool, &channel_record("chan_2")).unwrap();
        let resolved = get_entity(&pool, "channel", "chan_2").unwrap().unwrap();
        assert!(resolved.resolved);
        assert!(resolved.payload.is_some());
    }

    #[test]
    fn stub_does_not_clobber_real_row() {
        let pool = test_pool();
        upsert_entity(&pool, &channel_record("chan_3")).unwrap();
        assert!(!ensure_stub(&pool, "channel", "chan_3").unwrap());

        let row = get_entity(&pool, "channel", "chan_3").unwrap().unwrap();
        assert!(row.resolved);
        assert!(row.payload.is_some());
    }

    #[test]
    fn kind_of_detects_existing_kind() {
        let pool = test_pool();
        upsert_entity(&pool, &channel_record("amb_1")).unwrap();
        assert_eq!(kind_of(&pool, "amb_1").unwrap().as_deref(), Some("channel"));
        assert_eq!(kind_of(&pool, "missing").unwrap(), None);
    }

    #[test]
    fn edge_insert_is_idempotent() {
        let pool = test_pool();
        let edge = Edge::new(
            EntityRef::new(EntityKind::Channel, "chan_1"),
            EntityRef::new(EntityKind::User, "user_7"),
            EdgeKind::MemberOf,
        );
        assert!(insert_edge(&pool, &edge).unwrap());
        assert!(!insert_edge(&pool, &edge).unwrap());

        let edges = list_edges(&pool).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].kind, "MEMBER_OF");
    }

    #[test]
    fn committed_listing_tracks_status() {
        let pool = test_pool();
        upsert_entity(&pool, &channel_record("chan_1")).unwrap();
        assert!(list_committed(&pool).unwrap().is_empty());

        mark_committed(&pool, "channel", "chan_1").unwrap();
        let committed = list_committed(&pool).unwrap();
        assert_eq!(committed, vec![("channel".to_string(), "chan_1".to_string())]);
    }
}
