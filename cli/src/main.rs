use civic_node::{init_tracing, Node, NodeConfig, StorageKind};
use clap::Parser;
use governance::SystemClock;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "civicd")]
#[command(about = "Civic governance node")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"))]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Override the storage backend
    #[arg(long, value_enum)]
    storage: Option<StorageKind>,

    /// Override the data directory
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "signal_handler_failed");
    }
    info!("shutdown_requested");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(storage) = cli.storage {
        config.storage = storage;
    }
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    config.validate()?;

    init_tracing(&config.log_level);

    if cli.check {
        println!("configuration ok");
        return Ok(());
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        listen = %config.listen_addr,
        storage = ?config.storage,
        "node_starting"
    );

    let node = Node::build(config, Arc::new(SystemClock)).await?;
    node.run(shutdown_signal()).await
}
