mod handlers;
mod server;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bastion_core::client::ResilienceClient;
use bastion_core::config::ResilienceConfig;
use bastion_core::types::HealthStatus;

#[derive(Parser)]
#[command(
    name = "bastion",
    about = "Bastion: cross-process locks, dual-write storage and degradable caches for agent services",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP admin server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3100")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        #[command(flatten)]
        layer: LayerArgs,
    },

    /// Print a one-shot health report as JSON; exits non-zero when unhealthy
    Health {
        #[command(flatten)]
        layer: LayerArgs,
    },

    /// Print version information
    Version,
}

/// Overrides on top of the `BASTION_*` environment.
#[derive(Args)]
struct LayerArgs {
    /// Shared cache URL, e.g. redis://127.0.0.1:6379
    #[arg(long, env = "BASTION_CACHE_URL")]
    cache_url: Option<String>,

    /// Never contact the shared cache
    #[arg(long)]
    no_cache: bool,

    /// Storage backend: memory, sqlite, file or dual
    #[arg(long, env = "BASTION_STORAGE")]
    storage: Option<String>,

    /// Which dual-write backend answers reads first: a (sqlite) or b (file)
    #[arg(long, env = "BASTION_READ_PRIMARY")]
    read_primary: Option<String>,

    #[arg(long, env = "BASTION_SQLITE_PATH")]
    sqlite_path: Option<PathBuf>,

    #[arg(long, env = "BASTION_FILE_STORE_DIR")]
    file_store_dir: Option<PathBuf>,

    /// Directory for fallback lock files
    #[arg(long, env = "BASTION_LOCK_DIR")]
    lock_dir: Option<PathBuf>,

    /// Rate limiter behaviour while the cache is down: fail_open or fail_closed
    #[arg(long, env = "BASTION_RATE_LIMIT_POLICY")]
    rate_limit_policy: Option<String>,
}

impl LayerArgs {
    fn into_config(self) -> anyhow::Result<ResilienceConfig> {
        let mut config = ResilienceConfig::from_env().context("invalid BASTION_* environment")?;

        if let Some(url) = self.cache_url.filter(|u| !u.is_empty()) {
            config.cache_url = Some(url);
        }
        if self.no_cache {
            config.cache_disabled = true;
        }
        if let Some(storage) = self.storage {
            config.storage_backend = storage.parse()?;
        }
        if let Some(primary) = self.read_primary {
            config.read_primary = primary.parse()?;
        }
        if let Some(path) = self.sqlite_path {
            config.sqlite_path = path;
        }
        if let Some(dir) = self.file_store_dir {
            config.file_store_dir = dir;
        }
        if let Some(dir) = self.lock_dir {
            config.lock_dir = dir;
        }
        if let Some(policy) = self.rate_limit_policy {
            config.rate_limit_policy = policy.parse()?;
        }

        config.validate()?;
        Ok(config)
    }
}

/// One-shot health report for the `health` command.
///
/// Unlike `serve`, there is no in-memory fallback: a storage backend that
/// cannot be opened is reported as unhealthy.
async fn health_report(
    config: ResilienceConfig,
) -> anyhow::Result<(serde_json::Value, HealthStatus)> {
    match ResilienceClient::from_config(config) {
        Ok(client) => {
            let report = client.health().await;
            Ok((serde_json::to_value(&report)?, report.status))
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to open storage backend");
            let report = serde_json::json!({
                "status": HealthStatus::Unhealthy,
                "error": format!("storage backend could not be opened: {}", e),
            });
            Ok((report, HealthStatus::Unhealthy))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, host, layer } => {
            let config = layer.into_config()?;
            server::run(&host, port, config).await?;
        }
        Commands::Health { layer } => {
            let config = layer.into_config()?;
            let (report, status) = health_report(config).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if status == HealthStatus::Unhealthy {
                std::process::exit(1);
            }
        }
        Commands::Version => {
            println!("bastion {}", env!("CARGO_PKG_VERSION"));
            println!("Distributed resilience layer for multi-process agent services");
        }
    }
    Ok(())
}
