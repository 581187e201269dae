use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use clap::Parser;
use tracing::info;

use cronpulse_core::{cron, CronpulseConfig, JobId, TriggerType};
use cronpulse_scheduler::{AlertEvaluator, ExecutionRunner, HttpInvoker, Scheduler};
use cronpulse_store::SqliteStore;

mod cli;
mod notifier;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cronpulse_daemon=info,cronpulse_scheduler=info,cronpulse_store=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        // Previewing a cron expression needs no database.
        Commands::Next { expr, count, tz } => {
            let tz = match tz {
                Some(name) => cron::parse_timezone(&name)?,
                None => load_config(cli.config).scheduler.timezone,
            };
            for at in cron::upcoming(&expr, Utc::now(), count, tz)? {
                println!(
                    "{}",
                    at.with_timezone(&tz).to_rfc3339_opts(SecondsFormat::Secs, true)
                );
            }
        }
        Commands::Trigger { job_id } => {
            let scheduler = build_scheduler(&load_config(cli.config))?;
            let report = scheduler
                .trigger(&JobId::from(job_id), TriggerType::Manual)
                .await?;
            if report.status.is_failure() {
                tracing::warn!("retries and alerts for this run are not waited for");
            }
            println!(
                "{} {} {}",
                report.execution_id,
                report.status,
                report.error.unwrap_or_default()
            );
        }
        Commands::Run => run(build_scheduler(&load_config(cli.config))?).await,
    }

    Ok(())
}

/// Load config: --config flag > CRONPULSE_CONFIG env > ~/.cronpulse/cronpulse.toml.
fn load_config(flag: Option<String>) -> CronpulseConfig {
    let config_path = flag.or_else(|| std::env::var("CRONPULSE_CONFIG").ok());
    CronpulseConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        CronpulseConfig::default()
    })
}

/// Open the database and wire store, invoker, runner and scheduler together.
fn build_scheduler(config: &CronpulseConfig) -> anyhow::Result<Scheduler> {
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    let store = Arc::new(SqliteStore::new(db)?.with_timezone(config.scheduler.timezone));

    let invoker = Arc::new(HttpInvoker::new(&config.runner.user_agent)?);
    let alerts = AlertEvaluator::new(store.clone(), store.clone(), Arc::new(notifier::LogNotifier));
    let runner = Arc::new(ExecutionRunner::new(
        store.clone(),
        store.clone(),
        invoker,
        alerts,
        config,
    ));
    Ok(Scheduler::new(store.clone(), store, runner, &config.scheduler))
}

/// Run the scheduler loop until Ctrl-C.
async fn run(scheduler: Scheduler) {
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine = scheduler.clone();
    let task = tokio::spawn(async move { engine.run(shutdown_rx).await });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
    }
    info!("shutdown requested");

    // signal scheduler to stop
    let _ = shutdown_tx.send(true);
    if let Err(e) = task.await {
        tracing::error!("scheduler task ended abnormally: {e}");
    }
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
