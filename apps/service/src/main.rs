mod config;
mod database;
mod engine;
mod monitoring;
mod notify;
mod pool;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::database::{HealthStore, HealthStoreImpl};
use crate::engine::{Engine, ScopeContext};
use crate::monitoring::{PingDialect, ProbeScheduler, SystemProber};
use crate::notify::LogNotifier;

#[derive(Parser)]
#[command(name = "pulsemap", version, about = "Network device health monitoring engine")]
struct Cli {
    /// Path to the config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database file, overrides the configured path
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a map and keep probing its devices until interrupted
    Run {
        #[arg(long)]
        map: i64,
    },
    /// Probe one device once and print the outcome
    Check {
        #[arg(long)]
        device: Uuid,
    },
    /// Probe every eligible device of a map and print the changed ones
    CheckAll {
        #[arg(long)]
        map: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();

    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_deref())?;

    let db_path = cli
        .database
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| config.database.path.clone());

    let database = libsql::Builder::new_local(&db_path).build().await?;
    let pool = pool::build_pool(database)?;
    {
        let conn = pool.get().await?;
        database::initialize_database(&conn).await?;
    }
    let store: Arc<dyn HealthStore> = Arc::new(HealthStoreImpl::new(pool));

    let prober = Arc::new(SystemProber::new(
        Duration::from_secs(config.probes.timeout_seconds),
        Duration::from_millis(config.probes.tcp_timeout_millis),
    ));
    let scheduler = ProbeScheduler::new(
        prober,
        PingDialect::native(),
        config.probes.max_in_flight,
        Duration::from_secs(config.probes.bulk_deadline_seconds),
    );
    let engine = Engine::new(store, Arc::new(LogNotifier), scheduler);

    match cli.command {
        Command::Run { map } => {
            let ctx = ScopeContext { map_id: map, caller: Some("cli".to_string()) };
            let scheduled = engine.load_scope(&ctx).await?;
            info!(map_id = map, scheduled, "monitoring; press ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            engine.unload_scope(&ctx).await;
        }
        Command::Check { device } => {
            let summary = engine.check_one(device).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::CheckAll { map } => {
            let ctx = ScopeContext { map_id: map, caller: Some("cli".to_string()) };
            let changed = engine.check_all(&ctx).await?;
            println!("{}", serde_json::to_string_pretty(&changed)?);
        }
    }

    Ok(())
}
