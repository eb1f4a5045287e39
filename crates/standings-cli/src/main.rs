use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use standings_storage::PgStandingsGateway;
use standings_sync::{
    maybe_build_scheduler, run_refresh_once_from_env, CompetitionRegistry, RefreshPipeline,
    SyncConfig,
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "standings-cli")]
#[command(about = "Competition standings refresh CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Refresh every enabled competition once and print the run report.
    Sync,
    /// Run the cron scheduler until interrupted.
    Watch,
    /// Apply pending database migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = run_refresh_once_from_env().await?;
            for report in &summary.outcomes {
                println!("{} -> {}", report.competition_id, report.outcome);
            }
            println!(
                "refresh complete: run_id={} replaced={} skipped={} failed={}",
                summary.run_id,
                summary.replaced_competitions(),
                summary.skipped_competitions(),
                summary.failed_competitions()
            );
            if summary.all_failed() {
                bail!("every competition failed this run");
            }
        }
        Commands::Watch => {
            let config = SyncConfig::from_env();
            if !config.scheduler_enabled {
                bail!("scheduler disabled; set STANDINGS_SCHEDULER_ENABLED=1");
            }
            let registry = CompetitionRegistry::load(&config.registry_path)?;
            let gateway = PgStandingsGateway::connect(&config.database_url).await?;
            let pipeline = Arc::new(RefreshPipeline::new(config, registry, Arc::new(gateway))?);
            let mut sched = maybe_build_scheduler(pipeline)
                .await?
                .expect("scheduler enabled above");
            sched.start().await.context("starting scheduler")?;
            println!("scheduler running; press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let gateway = PgStandingsGateway::connect(&config.database_url).await?;
            gateway.run_migrations().await?;
            println!("migrations applied");
        }
    }

    Ok(())
}
