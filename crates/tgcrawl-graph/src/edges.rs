//! Idempotent edge upserts.
//!
//! One MERGE per endpoint node and one MERGE per relationship, keyed on
//! `(source external_id, target external_id, relationship type)`. Labels
//! and relationship types come from closed enums, so splicing them into
//! the Cypher text is safe; identifiers go through parameters.

use anyhow::Result;
use neo4rs::Query;
use tracing::debug;

use tgcrawl_core::Edge;

use crate::GraphClient;

/// Upsert a directed typed edge, creating bare endpoint nodes as needed.
///
/// Node properties live in the relational store; graph nodes carry only
/// the external id the traversals key on.
pub async fn upsert_edge(client: &GraphClient, edge: &Edge) -> Result<()> {
    let cypher = format!(
        "MERGE (s:{src} {{external_id: $source_id}})
         MERGE (t:{dst} {{external_id: $target_id}})
         MERGE (s)-[r:{rel}]->(t)
         ON CREATE SET r.created_at = timestamp()",
        src = edge.source.kind.node_label(),
        dst = edge.target.kind.node_label(),
        rel = edge.kind.rel_type(),
    );

    let query = Query::new(cypher)
        .param("source_id", edge.source.external_id.as_str())
        .param("target_id", edge.target.external_id.as_str());

    client.execute(query).await?;
    debug!(%edge, "edge upserted");
    Ok(())
}
