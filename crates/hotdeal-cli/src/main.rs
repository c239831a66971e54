mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hotdeal_storage::PgStore;
use hotdeal_sync::runtime::{
    build_affiliate_converter, build_crawl_pipeline, build_refresh_pass, open_store, Clients,
};
use hotdeal_sync::{maybe_build_scheduler, ConfigError, PipelineConfig, Stages};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "hotdeal-cli")]
#[command(about = "Hot-deal board ingestion pipeline")]
struct Cli {
    /// Pipeline configuration file.
    #[arg(long, short, global = true, default_value = "config/pipeline.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch listings and detail pages once and persist the deals.
    Crawl {
        /// Use an in-memory store instead of Postgres.
        #[arg(long)]
        dry_run: bool,
    },
    /// Attach affiliate links to deals that have none yet.
    Affiliate,
    /// Re-read recent posts and append metric snapshots.
    RefreshMetrics,
    /// Run the configured cron jobs until Ctrl-C.
    Schedule,
    /// Apply database migrations.
    Migrate,
}

fn load_config(path: &Path, dry_run: bool) -> Result<PipelineConfig> {
    let config = PipelineConfig::load(path)?;
    config
        .validate(dry_run)
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing("info")?;
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Crawl { dry_run: false }) {
        Commands::Crawl { dry_run } => {
            let mut config = load_config(&cli.config, dry_run)?;
            let store = open_store(&mut config, dry_run).await?;
            let clients = Clients::from_config(&config)?;
            let pipeline = build_crawl_pipeline(&config, store, &clients)?;
            let s = pipeline.run_once().await?;
            println!(
                "crawl complete: run_id={} targets={} fetched={} processed={} created={} skipped={} detail_failures={} parser_failures={} persist_failures={} listing_failures={}",
                s.run_id,
                s.targets,
                s.fetched,
                s.processed,
                s.created,
                s.skipped,
                s.detail_failures,
                s.parser_failures,
                s.persist_failures,
                s.listing_failures
            );
        }
        Commands::Affiliate => {
            let mut config = load_config(&cli.config, false)?;
            let store = open_store(&mut config, false).await?;
            let s = build_affiliate_converter(&config, store)?.run_once().await?;
            println!(
                "affiliate complete: candidates={} converted={} skipped={} failed={}",
                s.candidates, s.converted, s.skipped, s.failed
            );
        }
        Commands::RefreshMetrics => {
            let mut config = load_config(&cli.config, false)?;
            let store = open_store(&mut config, false).await?;
            let clients = Clients::from_config(&config)?;
            let s = build_refresh_pass(&config, store, &clients).run_once().await?;
            println!(
                "refresh complete: targets={} fetched={} refreshed={} detail_failures={} parser_failures={} persist_failures={}",
                s.targets, s.fetched, s.refreshed, s.detail_failures, s.parser_failures, s.persist_failures
            );
        }
        Commands::Schedule => {
            let mut config = load_config(&cli.config, false)?;
            let store = open_store(&mut config, false).await?;
            let clients = Clients::from_config(&config)?;
            let affiliate = if config.affiliate.is_some() {
                Some(Arc::new(build_affiliate_converter(&config, Arc::clone(&store))?))
            } else {
                None
            };
            let stages = Stages {
                crawl: Arc::new(build_crawl_pipeline(&config, Arc::clone(&store), &clients)?),
                affiliate,
                refresh: Arc::new(build_refresh_pass(&config, store, &clients)),
            };
            let Some(mut sched) = maybe_build_scheduler(&config.schedule, stages).await? else {
                anyhow::bail!("no cron expressions under `schedule` in {}", cli.config.display());
            };
            sched.start().await.context("starting scheduler")?;
            info!("scheduler running; press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl-C")?;
            sched.shutdown().await.context("stopping scheduler")?;
            println!("scheduler stopped");
        }
        Commands::Migrate => {
            let config = PipelineConfig::load(&cli.config)?;
            let url = config
                .database_url
                .as_deref()
                .filter(|url| !url.is_empty())
                .ok_or(ConfigError::MissingDatabaseUrl)?;
            let store = PgStore::connect(url, 1)
                .await
                .context("connecting to postgres")?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
    }

    Ok(())
}
