//! Replay relationally recorded edges into the graph store.
//!
//! The relational `edges` table is the durable record of every discovered
//! relationship; a crawl interrupted between the relational and graph
//! writes leaves the graph behind. Replaying is safe because graph writes
//! are MERGE-based.

use anyhow::{Context, Result};
use colored::Colorize;

use tgcrawl_core::CrawlConfig;
use tgcrawl_db::{migrations, DbPool};
use tgcrawl_engine::reconcile::reconcile_edges;
use tgcrawl_engine::stores;
use tgcrawl_graph::GraphClient;

pub async fn execute(config: CrawlConfig) -> Result<()> {
    let pool = DbPool::open(&config.db_path)?;
    migrations::run_migrations(&pool)?;

    let client = GraphClient::connect(&super::graph_config(&config))
        .await
        .with_context(|| format!("connecting to graph store at {}", config.graph.uri))?;
    tgcrawl_graph::schema::initialize_schema(&client).await?;

    let relational = stores::relational(pool);
    let graph = stores::graph(client);
    let replayed = reconcile_edges(relational.as_ref(), graph.as_ref()).await?;

    println!(
        "{}",
        format!("Reconcile complete: {replayed} edge(s) replayed.")
            .green()
            .bold()
    );

    Ok(())
}
