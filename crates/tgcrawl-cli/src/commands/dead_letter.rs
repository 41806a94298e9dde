//! Inspect the dead-letter queue.

use anyhow::Result;
use colored::Colorize;

use tgcrawl_core::CrawlConfig;
use tgcrawl_db::{migrations, queries, DbPool};

pub async fn execute(config: CrawlConfig) -> Result<()> {
    let pool = DbPool::open(&config.db_path)?;
    migrations::run_migrations(&pool)?;
    let letters = queries::dead_letter::list_dead_letters(&pool)?;

    if letters.is_empty() {
        println!("{}", "Dead-letter queue is empty.".dimmed());
        return Ok(());
    }

    println!("{}", format!("{} dead-lettered task(s):", letters.len()).bold());
    for row in letters {
        println!(
            "  {}  {}:{}  retries={}  {}",
            row.failed_at.dimmed(),
            row.kind,
            row.external_id,
            row.retries,
            row.cause.red(),
        );
    }

    Ok(())
}
