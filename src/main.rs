//! Rock-Paper-Scissors Match Server
//!
//! Authoritative match server. Clients create, join and play matches over
//! WebSocket; the engine owns all state and pushes snapshots on change.

use std::sync::Arc;
use anyhow::Context;
use tracing::{info, error};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rps_match::{
    VERSION,
    game::engine::{EngineConfig, MatchEngine},
    network::{GameServer, ServerConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let engine_config = EngineConfig::from_env();
    let server_config = ServerConfig::from_env();

    info!("RPS Match Server v{}", VERSION);
    info!(
        "First to {} wins, idle matches expire after {}s",
        engine_config.default_win_threshold,
        engine_config.idle_timeout.as_secs()
    );
    info!("Binding {}", server_config.bind_addr);

    let engine = Arc::new(MatchEngine::new(engine_config));
    let server = Arc::new(GameServer::new(server_config, engine));

    let runner = server.clone();
    let mut handle = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        result = &mut handle => {
            match result {
                Ok(Ok(())) => info!("Server stopped"),
                Ok(Err(e)) => {
                    error!("Server failed: {}", e);
                    return Err(e.into());
                }
                Err(e) => return Err(e).context("Server task panicked"),
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            info!("Ctrl-C received, shutting down");
            server.shutdown();
            handle.await.context("Server task panicked")??;
        }
    }

    Ok(())
}
