use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use jobfeed_core::SearchQuery;
use jobfeed_ingest::{build_scheduler, coordinator_from_env, IngestConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "jobfeed")]
#[command(about = "Multi-source job ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one ingestion with the given search parameters.
    Ingest {
        #[arg(long, value_delimiter = ',')]
        keywords: Vec<String>,
        /// Repeatable; also accepts a comma-separated list.
        #[arg(long = "location", value_delimiter = ',')]
        locations: Vec<String>,
        #[arg(long)]
        remote: bool,
        #[arg(long, default_value_t = 50)]
        max_results: usize,
    },
    /// Start the cron scheduler and run ingestion on the configured cadence.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = IngestConfig::from_env();

    match cli.command {
        Commands::Ingest {
            keywords,
            locations,
            remote,
            max_results,
        } => {
            let coordinator = coordinator_from_env(&config).await?;
            let query = SearchQuery {
                keywords,
                locations,
                remote,
                max_results,
            };
            let total_sources = coordinator.source_names().len();
            let summary = coordinator.run(&query).await?;

            println!(
                "ingestion complete: run_id={} fetched={} deduplicated={} persisted={} persist_failures={} failed_sources={:?}",
                summary.run_id,
                summary.fetched,
                summary.deduplicated,
                summary.persisted,
                summary.persist_failures,
                summary.failed_sources
            );
            if summary.fully_degraded(total_sources) {
                eprintln!("warning: every source failed; zero results reflect an outage, not an empty market");
            }
        }
        Commands::Schedule => {
            let scheduler_config = IngestConfig {
                scheduler_enabled: true,
                ..config
            };
            let coordinator = coordinator_from_env(&scheduler_config).await?;
            let Some(mut scheduler) = build_scheduler(coordinator, &scheduler_config).await? else {
                bail!("scheduler could not be built");
            };
            scheduler.start().await?;
            info!(cron = %scheduler_config.ingest_cron, "scheduler started; ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            scheduler.shutdown().await?;
        }
    }

    Ok(())
}
