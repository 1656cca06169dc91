use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info};

use tile_cache::{SharedTileCache, TileCache, TileStore};
use ws_relay::{AuthKey, Gateway, TileHandler, UplinkConfig, UplinkSink, UpstreamLink};

/// Everything the relay needs to start, resolved from config and CLI.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Host name or IP literal; resolved when the gateway binds.
    pub listen_host: String,
    pub listen_port: u16,
    pub uplink_url: String,
    pub map_id: String,
    pub state_file: std::path::PathBuf,
    pub reconnect_delay: Duration,
    pub save_interval: Duration,
}

/// The running relay: producer gateway, backend link, tile cache and its
/// periodic snapshot.
pub struct RelayService {
    cache: SharedTileCache,
    store: TileStore,
    gateway: Gateway,
    handler: Arc<TileHandler>,
    uplink: UpstreamLink,
    save_interval: Duration,
}

impl RelayService {
    /// Restore the cache, bind the gateway, then start connecting upstream.
    ///
    /// Fails only if the listen address cannot be resolved or bound; no
    /// upstream connection is attempted in that case.
    pub async fn start(settings: RelaySettings) -> Result<Self> {
        let store = TileStore::new(&settings.state_file);
        let cache = SharedTileCache::new(TileCache::new());
        cache.restore(store.load_or_default().await);

        let gateway = Gateway::bind((settings.listen_host.as_str(), settings.listen_port))
            .await
            .with_context(|| {
                format!("failed to bind {}:{}", settings.listen_host, settings.listen_port)
            })?;
        let listen_addr = gateway.local_addr()?;

        let uplink = UpstreamLink::spawn(UplinkConfig {
            url: settings.uplink_url.clone(),
            reconnect_delay: settings.reconnect_delay,
        });
        let handler = Arc::new(TileHandler::new(
            AuthKey::from_map_id(&settings.map_id),
            cache.clone(),
            Arc::new(uplink.clone()) as Arc<dyn UplinkSink>,
        ));

        info!(
            listen = %listen_addr,
            uplink = %uplink.url(),
            tiles = cache.len(),
            save_interval_secs = settings.save_interval.as_secs(),
            "tile relay started"
        );

        Ok(Self {
            cache,
            store,
            gateway,
            handler,
            uplink,
            save_interval: settings.save_interval,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.gateway.local_addr()
    }

    #[cfg(test)]
    pub fn cache(&self) -> &SharedTileCache {
        &self.cache
    }

    /// Serve until a shutdown signal arrives, snapshotting the cache every
    /// `save_interval`. On shutdown one last snapshot is written.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let result = tokio::select! {
            r = self.gateway.serve(Arc::clone(&self.handler)) => r,
            _ = self.persist_periodically() => Ok(()),
            _ = shutdown_rx.recv() => {
                info!("shutdown signal received");
                Ok(())
            }
        };

        self.uplink.shutdown();
        self.save_snapshot().await;
        info!(tiles = self.cache.len(), "tile relay stopped");

        result
    }

    async fn persist_periodically(&self) {
        loop {
            tokio::time::sleep(self.save_interval).await;
            self.save_snapshot().await;
        }
    }

    /// Failures are logged; the next tick retries.
    async fn save_snapshot(&self) {
        let snapshot = self.cache.snapshot();
        if let Err(err) = self.store.save(&snapshot).await {
            error!(%err, "failed to save tile snapshot");
        }
    }
}
