//! shard-bootstrap: provisions bootstrap hosts for every shard and joins one
//! of them with a sharding client.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use shard_core::config::ShardConfig;
use shard_core::logging;
use shard_network::{RandomPortSelector, SessionParams, run_session};

/// Shard bootstrap: provision rendezvous peers and join a shard
#[derive(Parser, Debug)]
#[command(name = "shard-bootstrap")]
#[command(about = "Provision bootstrap peers for every shard and join one of them")]
struct Cli {
    /// Identity seed; 0 uses secure randomness
    #[arg(long)]
    seed: Option<i64>,

    /// Shard the client joins
    #[arg(long)]
    shard_id: Option<u32>,

    /// Number of shards to provision
    #[arg(long)]
    shard_count: Option<u32>,

    /// JSON config file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter directive (RUST_LOG takes precedence)
    #[arg(long)]
    log_filter: Option<String>,

    /// Directory for daily rolling log files
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Cli {
    /// The config file (or defaults) with command-line overrides applied.
    fn resolve_config(&self) -> Result<ShardConfig> {
        let mut config = match &self.config {
            Some(path) => ShardConfig::load(path)?,
            None => ShardConfig::default(),
        };

        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(shard_id) = self.shard_id {
            config.shard_id = shard_id;
        }
        if let Some(shard_count) = self.shard_count {
            config.shard_count = shard_count;
        }
        if let Some(filter) = &self.log_filter {
            config.log.filter = filter.clone();
        }
        if let Some(dir) = &self.log_dir {
            config.log.log_dir = Some(dir.clone());
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn session_params(config: &ShardConfig) -> SessionParams {
    SessionParams {
        seed: config.seed,
        shard_id: config.shard_id,
        shard_count: config.shard_count,
        listen_ip: config.listen_ip,
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Run the session, then keep every host up until Ctrl-C.
async fn supervise(config: ShardConfig) -> Result<()> {
    let ports = Arc::new(RandomPortSelector::new(config.port_range.as_range()));
    let report = run_session(session_params(&config), ports)
        .await
        .context("Bootstrap session failed")?;

    info!(
        "Sharding client {} joined shard {} ({} bootstrap nodes running)",
        report.client.peer_id(),
        config.shard_id,
        report.registry.hosts().count()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    drop(report);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.resolve_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let _guard = match logging::init_logging(&config.log) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    match supervise(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
