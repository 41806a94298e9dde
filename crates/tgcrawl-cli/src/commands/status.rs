//! Store status counts.

use anyhow::Result;
use colored::Colorize;

use tgcrawl_core::CrawlConfig;
use tgcrawl_db::{migrations, queries, DbPool};
use tgcrawl_graph::GraphClient;

pub async fn execute(config: CrawlConfig) -> Result<()> {
    let pool = DbPool::open(&config.db_path)?;
    migrations::run_migrations(&pool)?;
    let counts = queries::entities::counts(&pool)?;

    println!("{}", "Relational store".bold());
    println!("  Entities:     {}", counts.entities);
    println!("  Committed:    {}", counts.committed);
    println!("  Stubs:        {}", counts.stubs);
    println!("  Edges:        {}", counts.edges);
    println!("  Dead letters: {}", counts.dead_letters);

    // Status stays usable when only the relational side is reachable.
    match GraphClient::connect(&super::graph_config(&config)).await {
        Ok(client) => {
            let graph = client.get_counts().await?;
            println!("\n{}", "Graph store".bold());
            println!("  Nodes:         {}", graph.nodes);
            println!("  Relationships: {}", graph.relationships);
        }
        Err(e) => {
            println!("\n{}", format!("Graph store unreachable: {e}").yellow());
        }
    }

    Ok(())
}
