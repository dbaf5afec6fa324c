//! Maze Race Server
//!
//! Binary entry point: installs logging, assembles the configuration from
//! the environment, and runs the server until ctrl-c.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use maze_race::{GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging; RUST_LOG overrides the default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let config = config_from_env()?;

    info!("Maze Race Server v{}", VERSION);
    info!("Bind address: {}", config.bind_addr);
    info!("Max connections: {}", config.max_connections);
    info!(
        "Heartbeat timeout: {}s",
        config.heartbeat_timeout.as_secs()
    );

    let server = GameServer::new(config);

    tokio::select! {
        result = server.run() => result.context("server terminated")?,
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
            server.shutdown();
        }
    }

    Ok(())
}

/// Build the configuration, letting the environment override defaults.
///
/// `MAZE_RACE_ADDR` sets the bind address, `MAZE_RACE_MAX_CONNECTIONS`
/// the connection cap. Registration of the bound address with a lobby
/// directory is a deployment concern outside this process.
fn config_from_env() -> anyhow::Result<ServerConfig> {
    let mut config = ServerConfig::default();

    if let Ok(addr) = std::env::var("MAZE_RACE_ADDR") {
        config.bind_addr = addr
            .parse()
            .with_context(|| format!("invalid MAZE_RACE_ADDR: {addr}"))?;
    }
    if let Ok(max) = std::env::var("MAZE_RACE_MAX_CONNECTIONS") {
        config.max_connections = max
            .parse()
            .with_context(|| format!("invalid MAZE_RACE_MAX_CONNECTIONS: {max}"))?;
    }

    Ok(config)
}
