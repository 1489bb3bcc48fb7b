//! Logi Daemon - supply ledger host
//!
//! The daemon provides:
//! - Startup catch-up of supply decay accrued while offline
//! - Periodic decay ticks and dashboard reconciliation
//! - Coalesced audit log delivery
//! - Weekly leaderboard close-out

use clap::Parser;
use logi_daemon::{DaemonResult, LogiConfig, Server};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Logi Daemon CLI
#[derive(Parser)]
#[command(name = "logid")]
#[command(about = "Logi Daemon - supply ledger and dashboard reconciler", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "LOGI_CONFIG")]
    config: Option<String>,

    /// Ledger data directory
    #[arg(short, long, env = "LOGI_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "LOGI_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "LOGI_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = LogiConfig::load(cli.config.as_deref())?;

    // Override with CLI args
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Print startup banner
    println!(
        r#"
  _                 _
 | |    ___   __ _ (_)
 | |   / _ \ / _` || |
 | |__| (_) | (_| || |
 |_____\___/ \__, ||_|
             |___/

  Supply Ledger & Reconciliation Engine
  Version: {}
  Data: {}
"#,
        env!("CARGO_PKG_VERSION"),
        config.storage.data_dir.display()
    );

    // Create and run server
    let server = Server::new(config).await?;
    server.run().await
}
