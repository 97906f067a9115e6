use anyhow::Result;
use clap::{Parser, Subcommand};
use queuecast_adapters::EnvCredentials;
use queuecast_sync::{
    enabled_integrations, maybe_build_scheduler, run_cleanup_once, run_sync_once,
    IntegrationKind, SyncConfig,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "queuecast")]
#[command(about = "Content queue sync command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync pass for an integration (or every enabled one).
    Sync {
        /// Integration to sync: buffer or typefully. Defaults to the
        /// enabled integrations from the registry file.
        #[arg(long)]
        integration: Option<IntegrationKind>,
    },
    /// Sweep sent/skipped/expired rows to the archive sheet.
    Cleanup {
        #[arg(long)]
        integration: Option<IntegrationKind>,
    },
    /// Run the cron scheduler until interrupted.
    Schedule,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn selected_kinds(config: &SyncConfig, explicit: Option<IntegrationKind>) -> Result<Vec<IntegrationKind>> {
    match explicit {
        Some(kind) => Ok(vec![kind]),
        None => {
            let integrations = enabled_integrations(config)?;
            anyhow::ensure!(
                !integrations.is_empty(),
                "no enabled integrations in {}",
                config.registry_path.display()
            );
            Ok(integrations.iter().map(|i| i.kind).collect())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();
    let credentials = EnvCredentials;

    match cli.command.unwrap_or(Commands::Sync { integration: None }) {
        Commands::Sync { integration } => {
            for kind in selected_kinds(&config, integration)? {
                let summary = run_sync_once(kind, &config, &credentials).await?;
                println!(
                    "{} sync complete: run_id={} processed={} sent={} duplicates={} skipped={}",
                    kind.as_str(),
                    summary.run_id,
                    summary.processed,
                    summary.sent,
                    summary.duplicates,
                    summary.skipped
                );
            }
        }
        Commands::Cleanup { integration } => {
            for kind in selected_kinds(&config, integration)? {
                let summary = run_cleanup_once(kind, &config, &credentials).await?;
                println!(
                    "{} cleanup complete: archived={} kept={}",
                    kind.as_str(),
                    summary.archived,
                    summary.kept
                );
            }
        }
        Commands::Schedule => {
            let Some(scheduler) = maybe_build_scheduler(&config).await? else {
                eprintln!("scheduler disabled; set QUEUECAST_SCHEDULER_ENABLED=1");
                return Ok(());
            };
            scheduler.start().await?;
            info!(
                sync_cron = %config.sync_cron,
                cleanup_cron = %config.cleanup_cron,
                "scheduler running, press ctrl-c to stop"
            );
            tokio::signal::ctrl_c().await?;
        }
    }

    Ok(())
}
