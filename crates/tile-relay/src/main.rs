mod cli;
mod config;
mod logging;
mod service;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use crate::cli::Cli;
use crate::service::{RelayService, RelaySettings};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let mut cfg = config::load(&cli.config)?;
    cfg.merge_cli(&cli);

    // 3. Init tracing-subscriber with JSON format.
    logging::init(cfg.log);

    info!(
        config_file = %cli.config.display(),
        listen_host = %cfg.websocket.host,
        listen_port = cfg.websocket.port,
        uplink = %cfg.websocket.uplink,
        state_file = %cfg.persistence.path.display(),
        "tile-relay starting"
    );

    if cfg.map.id.is_empty() {
        warn!("map.id is empty; producers must authenticate with the digest of an empty string");
    }

    // 4. Set up shutdown signal (ctrl_c + SIGTERM).
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    info!("received SIGINT (ctrl-c)");
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("received SIGINT (ctrl-c)");
        }

        let _ = shutdown_tx.send(());
    });

    // 5. Start the relay. A bind failure aborts startup.
    let settings = RelaySettings {
        listen_host: cfg.websocket.host.clone(),
        listen_port: cfg.websocket.port,
        uplink_url: cfg.websocket.uplink.clone(),
        map_id: cfg.map.id.clone(),
        state_file: cfg.persistence.path.clone(),
        reconnect_delay: cfg.reconnect_delay(),
        save_interval: cfg.save_interval(),
    };
    let service = RelayService::start(settings).await?;

    // 6. Serve until shutdown, then write the final snapshot.
    service.run(shutdown_rx).await?;

    info!("tile-relay shut down");
    Ok(())
}
