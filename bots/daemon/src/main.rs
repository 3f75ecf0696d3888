//! PulseWatch daemon: wires the token lifecycle + scoring engine's
//! collaborators together and runs the two-tier scheduler until shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pulsewatch_core::apis::DexScreenerClient;
use pulsewatch_core::config::AppConfig;
use pulsewatch_core::exporter;
use pulsewatch_core::repository::{PgTokenRepository, TokenRepository};
use pulsewatch_core::scheduler::Scheduler;
use pulsewatch_core::settings::Settings;
use pulsewatch_core::types::SchedulerGroup;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::{error, info};

/// PulseWatch token lifecycle and activity-scoring daemon.
#[derive(Parser, Debug)]
#[command(name = "pulsewatch-daemon", version)]
struct Cli {
    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Construct and validate wiring, run zero scheduler ticks, then exit.
    #[arg(long)]
    dry_run: bool,

    /// Run a single hot + cold tick synchronously, then exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    let _log_guard = pulsewatch_core::init_tracing(&config.log_level, config.log_dir.as_deref());
    info!(version = pulsewatch_core::VERSION, "pulsewatch daemon starting");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("../../migrations").run(&pool).await?;

    let settings = Arc::new(Settings::new(pool.clone()));
    let repository: Arc<dyn TokenRepository> = Arc::new(PgTokenRepository::new(pool));
    let client = Arc::new(DexScreenerClient::new(config.dexscreener_base_url.clone()));

    if cli.dry_run {
        info!("dry run: wiring constructed successfully, exiting");
        return Ok(());
    }

    let scheduler = Arc::new(Scheduler::new(client, repository.clone(), settings.clone()));

    if cli.once {
        scheduler.tick(SchedulerGroup::Hot).await;
        scheduler.tick(SchedulerGroup::Cold).await;
        let export_path = PathBuf::from(&config.notarb_export_path);
        if let Err(err) = exporter::export(repository.as_ref(), &settings, &export_path, 100).await {
            error!(%err, "notarb export failed");
        }
        return Ok(());
    }

    if !config.scheduler_enabled {
        info!("scheduler disabled by configuration, idling until shutdown");
        tokio::signal::ctrl_c().await?;
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let exporter_handle = {
        let repository = repository.clone();
        let settings = settings.clone();
        let export_path = PathBuf::from(&config.notarb_export_path);
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(err) = exporter::export(repository.as_ref(), &settings, &export_path, 100).await {
                            error!(%err, "notarb export failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    };

    let graceful_timeout = Duration::from_secs(config.graceful_shutdown_timeout_secs);
    let mut scheduler_handle = tokio::spawn(async move { scheduler.run(shutdown_rx, graceful_timeout).await });

    let clean_shutdown = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("shutdown signal received");
            true
        }
        result = &mut scheduler_handle => {
            // Scheduler exited on its own, either cleanly (shutdown already
            // signalled elsewhere) or because a group gave up self-healing.
            result.unwrap_or(false)
        }
    };

    let _ = shutdown_tx.send(true);
    let _ = exporter_handle.await;
    if !scheduler_handle.is_finished() {
        let _ = scheduler_handle.await;
    }

    info!("pulsewatch daemon stopped");
    if clean_shutdown {
        Ok(())
    } else {
        anyhow::bail!("scheduler requested a full process restart after exhausting self-healing attempts");
    }
}
