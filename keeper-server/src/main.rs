//! Keeper sync server binary.

use clap::Parser;
use keeper_core::Database;
use keeper_server::ServerConfig;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keeper-server", about = "Secret keeper sync server")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "keeper-server.toml")]
    config: PathBuf,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<String>,

    /// Database path override
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Echo mutations back to the sending device
    #[arg(long)]
    echo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut cfg = if cli.config.exists() {
        ServerConfig::load(&cli.config)?
    } else {
        tracing::info!("No config file found, using defaults");
        ServerConfig::default()
    };

    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }
    if let Some(database) = cli.database {
        cfg.storage_path = database;
    }
    if cli.echo {
        cfg.echo_to_origin = true;
    }

    tracing::info!("Starting keeper server on {}", cfg.listen_addr);

    let db = Database::open(&cfg.storage_path)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    keeper_server::serve(listener, &db, &cfg, shutdown_rx).await?;

    if let Err(e) = db.close() {
        tracing::warn!("Failed to close database: {}", e);
    }
    tracing::info!("Server stopped");
    Ok(())
}
