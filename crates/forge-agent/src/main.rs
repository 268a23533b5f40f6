//! # forge
//!
//! Forge API server binary — loads settings, wires the server, and runs
//! until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use forge_server::ForgeServer;

/// Forge printer API server.
#[derive(Parser, Debug)]
#[command(name = "forge", about = "Forge printer API server")]
struct Cli {
    /// Host to bind (overrides settings if specified).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings if specified).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the settings file (default: `~/.forge/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Firmware Unix socket path (overrides settings if specified).
    #[arg(long)]
    socket: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args.settings.unwrap_or_else(forge_settings::settings_path);
    let mut settings = forge_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("failed to load settings from {}", settings_path.display()))?;
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(socket) = args.socket {
        settings.link.socket_path = socket;
    }

    forge_core::logging::init(&settings.logging.filter);

    let bind = format!("{}:{}", settings.server.host, settings.server.port);
    let server = ForgeServer::build(Arc::new(settings), Vec::new())
        .await
        .context("server startup failed")?;

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    tokio::select! {
        served = server.serve(listener) => {
            served.context("server error")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            tracing::info!("interrupt received");
        }
    }

    server.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}
