use std::sync::Arc;

use adpulse_sync::{
    build_orchestrator, maybe_build_scheduler, HourlyOptions, HourlyStrategy, SyncConfig,
};
use adpulse_web::AppState;
use anyhow::Result;
use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "adpulse-cli")]
#[command(about = "Ad insights sync command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sync today's daily insights for all active businesses.
    Sync,
    /// Sync hour-of-day stats.
    Hourly {
        #[arg(long, default_value_t = 1)]
        days: u32,
        #[arg(long)]
        business: Option<Uuid>,
        /// Fetch one explicit range per day instead of one preset batch.
        #[arg(long)]
        per_day: bool,
    },
    /// Backfill historical daily insights.
    Backfill {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Run migrations and serve the trigger endpoints (+ scheduler if enabled).
    Serve,
    /// Apply database migrations and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let (orchestrator, _store) = build_orchestrator(&config).await?;
            let report = orchestrator.sync_daily().await?;
            println!(
                "daily sync complete: synced={} failed={} skipped={}",
                report.synced, report.failed, report.skipped
            );
        }
        Commands::Hourly {
            days,
            business,
            per_day,
        } => {
            let (orchestrator, _store) = build_orchestrator(&config).await?;
            let summary = orchestrator
                .sync_hourly(&HourlyOptions {
                    days_back: days,
                    business_id: business,
                    strategy: if per_day {
                        HourlyStrategy::PerDayRange
                    } else {
                        HourlyStrategy::PresetBatch
                    },
                })
                .await?;
            println!(
                "hourly sync complete: synced={} failed={} records={}",
                summary.report.synced, summary.report.failed, summary.total_records
            );
        }
        Commands::Backfill { days } => {
            let (orchestrator, _store) = build_orchestrator(&config).await?;
            let report = orchestrator.sync_historical(days).await?;
            println!(
                "backfill complete: synced={} failed={} skipped={}",
                report.synced, report.failed, report.skipped
            );
        }
        Commands::Serve => {
            let (orchestrator, store) = build_orchestrator(&config).await?;
            store.run_migrations().await?;
            let orchestrator = Arc::new(orchestrator);
            let scheduler = maybe_build_scheduler(&config, orchestrator.clone()).await?;
            if let Some(scheduler) = scheduler {
                scheduler.start().await?;
            }
            adpulse_web::serve_from_env(AppState::new(orchestrator)).await?;
        }
        Commands::Migrate => {
            let (_orchestrator, store) = build_orchestrator(&config).await?;
            store.run_migrations().await?;
            println!("migrations applied");
        }
    }

    Ok(())
}
