//! CLI command definitions and handlers.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tgcrawl_core::CrawlConfig;

pub mod dead_letter;
pub mod reconcile;
pub mod run;
pub mod status;

/// Dual-store crawler ingestion pipeline
#[derive(Parser)]
#[command(name = "tgcrawl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true, env = "TGCRAWL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the ingestion pipeline from the configured seeds
    Run(run::RunArgs),

    /// Show relational, graph, and dead-letter counts
    Status,

    /// List dead-lettered tasks
    DeadLetter,

    /// Replay relationally recorded edges into the graph store
    Reconcile,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = CrawlConfig::load(self.config.as_deref())?;

        match self.command {
            Commands::Run(args) => run::execute(args, config).await,
            Commands::Status => status::execute(config).await,
            Commands::DeadLetter => dead_letter::execute(config).await,
            Commands::Reconcile => reconcile::execute(config).await,
        }
    }
}

pub(crate) fn graph_config(config: &CrawlConfig) -> tgcrawl_graph::GraphConfig {
    tgcrawl_graph::GraphConfig {
        uri: config.graph.uri.clone(),
        user: config.graph.user.clone(),
        password: config.graph.password.clone(),
    }
}
