//! Run the ingestion pipeline.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tracing::info;

use tgcrawl_core::config::parse_seed;
use tgcrawl_core::CrawlConfig;
use tgcrawl_db::{migrations, DbPool};
use tgcrawl_engine::{stores, CheckpointManager, Engine, EngineOptions, HttpFetcher};
use tgcrawl_graph::GraphClient;

#[derive(Args)]
pub struct RunArgs {
    /// Extra seed identifiers as `kind:id` (e.g. `channel:durov`),
    /// appended to the seeds from the config file
    #[arg(long = "seed", value_name = "KIND:ID")]
    pub seeds: Vec<String>,
}

pub async fn execute(args: RunArgs, config: CrawlConfig) -> Result<()> {
    let pool = DbPool::open(&config.db_path)
        .with_context(|| format!("opening relational store at {}", config.db_path.display()))?;
    migrations::run_migrations(&pool)?;

    let client = GraphClient::connect(&super::graph_config(&config))
        .await
        .with_context(|| format!("connecting to graph store at {}", config.graph.uri))?;
    tgcrawl_graph::schema::initialize_schema(&client).await?;

    let mut seeds = config.seed_refs()?;
    for raw in &args.seeds {
        seeds.push(parse_seed(raw)?);
    }
    if seeds.is_empty() {
        anyhow::bail!("no seeds configured; add `seeds` to the config file or pass --seed");
    }

    let fetcher = HttpFetcher::new(config.api_base.as_str())?;
    let engine = Engine::new(
        stores::relational(pool),
        stores::graph(client),
        Arc::new(fetcher),
        config.rate.into(),
        config.retry.into(),
        CheckpointManager::new(config.checkpoint.path.clone()),
        EngineOptions::from_config(&config),
    );

    // ctrl-c flips the shutdown flag; workers finish in-flight commits
    // within the grace deadline and a final checkpoint is written.
    let shutdown = engine.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = shutdown.send(true);
        }
    });

    let summary = engine.run(seeds).await?;

    println!("\n{}", "Crawl finished:".green().bold());
    println!("  Entities committed: {}", summary.committed);
    println!("  Edges recorded:     {}", summary.edges_recorded);
    println!("  Stubs created:      {}", summary.stubs_created);
    println!("  Store retries:      {}", summary.store_retries);
    println!("  Dead-lettered:      {}", summary.dead_lettered);

    Ok(())
}
