//! Neo4j schema initialization (constraints and indexes).

use anyhow::Result;
use neo4rs::Query;
use tracing::info;

use crate::GraphClient;

/// Cypher statements for schema initialization.
const SCHEMA_STATEMENTS: &[&str] = &[
    // One node per external id, per kind label
    "CREATE CONSTRAINT channel_external_id IF NOT EXISTS FOR (c:Channel) REQUIRE c.external_id IS UNIQUE",
    "CREATE CONSTRAINT user_external_id IF NOT EXISTS FOR (u:User) REQUIRE u.external_id IS UNIQUE",
    "CREATE CONSTRAINT message_external_id IF NOT EXISTS FOR (m:Message) REQUIRE m.external_id IS UNIQUE",
];

/// Initialize Neo4j schema with constraints and indexes.
///
/// Safe to run multiple times - uses IF NOT EXISTS clauses.
pub async fn initialize_schema(client: &GraphClient) -> Result<()> {
    info!("Initializing graph schema...");

    for statement in SCHEMA_STATEMENTS {
        client.execute(Query::new(statement.to_string())).await?;
    }

    info!(
        "Graph schema initialized ({} statements)",
        SCHEMA_STATEMENTS.len()
    );
    Ok(())
}
