use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use tile_cache::{SharedTileCache, TileAnnouncement, TileMetadata};

use crate::auth::AuthKey;
use crate::frame::{fingerprint, reframe};
use crate::protocol::{parse_client_message, ClientMessage, ProtocolError, ServerMessage};
use crate::uplink::{LinkError, UplinkSink};

/// Per-connection metadata carried into log records.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub connection_id: uuid::Uuid,
    pub remote_addr: SocketAddr,
}

/// What happened to one binary frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOutcome {
    /// Matched an announcement and went upstream.
    Forwarded,
    /// No pending announcement has this fingerprint; dropped.
    Unmatched,
    /// Matched, but the backend link was down; dropped.
    LinkUnavailable,
}

/// Protocol logic shared by every client connection.
pub struct TileHandler {
    auth: AuthKey,
    cache: SharedTileCache,
    uplink: Arc<dyn UplinkSink>,
}

impl TileHandler {
    pub fn new(auth: AuthKey, cache: SharedTileCache, uplink: Arc<dyn UplinkSink>) -> Self {
        Self {
            auth,
            cache,
            uplink,
        }
    }

    /// Handle a text frame. `None` means nothing is sent back, which is the
    /// case for malformed JSON and unknown message types.
    pub fn handle_text(&self, text: &str, ctx: &ConnectionContext) -> Option<ServerMessage> {
        match parse_client_message(text) {
            Ok(ClientMessage::Auth { hash }) => {
                let ok = self.auth.verify(&hash);
                debug!(connection_id = %ctx.connection_id, ok, "auth request");
                Some(ServerMessage::Auth { ok })
            }
            Ok(ClientMessage::TileInfo { data }) => Some(self.announce(data, ctx)),
            Err(ProtocolError::UnknownType(kind)) => {
                warn!(connection_id = %ctx.connection_id, %kind, "unknown message type");
                None
            }
            Err(err @ ProtocolError::Malformed(_)) => {
                warn!(connection_id = %ctx.connection_id, %err, "ignoring text frame");
                None
            }
        }
    }

    fn announce(&self, data: TileAnnouncement, ctx: &ConnectionContext) -> ServerMessage {
        let hash = data.hash.clone();
        let file_name = data.file_name.clone();

        let ok = match TileMetadata::try_from(data) {
            Ok(meta) => self.cache.announce(meta).is_accepted(),
            Err(err) => {
                warn!(connection_id = %ctx.connection_id, %file_name, %err, "tile announcement rejected");
                false
            }
        };

        debug!(connection_id = %ctx.connection_id, %file_name, %hash, ok, "tile announcement");
        ServerMessage::TileResponse { ok, hash }
    }

    /// Handle a binary frame: correlate it to its announcement by
    /// fingerprint and push it upstream with a coordinate header. The sender
    /// never hears about the outcome.
    pub fn handle_binary(&self, data: &[u8], ctx: &ConnectionContext) -> BinaryOutcome {
        let hash = fingerprint(data);

        let Some(meta) = self.cache.resolve_by_hash(&hash) else {
            warn!(connection_id = %ctx.connection_id, %hash, "no announced tile for binary frame");
            return BinaryOutcome::Unmatched;
        };

        match self.uplink.forward(reframe(meta.coords, data)) {
            Ok(()) => {
                debug!(
                    connection_id = %ctx.connection_id,
                    file_name = %meta.file_name,
                    x = meta.coords.x,
                    y = meta.coords.y,
                    bytes = data.len(),
                    "tile forwarded upstream"
                );
                BinaryOutcome::Forwarded
            }
            Err(LinkError::Unavailable) => {
                warn!(
                    connection_id = %ctx.connection_id,
                    file_name = %meta.file_name,
                    "upstream link unavailable; tile dropped"
                );
                BinaryOutcome::LinkUnavailable
            }
        }
    }
}

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Inbound WebSocket listener for tile producers.
pub struct Gateway {
    listener: TcpListener,
}

impl Gateway {
    /// Bind the listening socket. `addr` may name the host, e.g.
    /// `("localhost", 8080)`; every resolved address is tried in turn.
    pub async fn bind(addr: impl ToSocketAddrs) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "tile gateway listening");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, one task per connection.
    pub async fn serve(&self, handler: Arc<TileHandler>) -> anyhow::Result<()> {
        let listener = &self.listener;
        loop {
            let (stream, remote_addr) = accept_retrying(move || listener.accept()).await;
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, remote_addr, handler).await {
                    debug!(%remote_addr, %err, "connection handler error");
                }
            });
        }
    }
}

/// Run `accept` until it succeeds, sleeping [`ACCEPT_BACKOFF`] after each
/// failure so a persistent error (EMFILE) does not spin.
async fn accept_retrying<F, Fut, T>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(err) => {
                error!(
                    %err,
                    retry_ms = ACCEPT_BACKOFF.as_millis() as u64,
                    "failed to accept connection"
                );
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Drive one client connection from handshake to close. Messages are
/// handled strictly in arrival order.
async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    handler: Arc<TileHandler>,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let ctx = ConnectionContext {
        connection_id: uuid::Uuid::new_v4(),
        remote_addr,
    };
    info!(connection_id = %ctx.connection_id, %remote_addr, "client connected");

    let (mut writer, mut reader) = ws.split();
    let mut close_frame: Option<CloseFrame> = None;

    while let Some(msg) = reader.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                debug!(connection_id = %ctx.connection_id, %err, "read error, closing connection");
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                let Some(reply) = handler.handle_text(text.as_str(), &ctx) else {
                    continue;
                };
                let json = serde_json::to_string(&reply)?;
                if writer.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Message::Binary(data) => {
                handler.handle_binary(&data, &ctx);
            }
            Message::Close(frame) => {
                close_frame = frame;
                break;
            }
            // Pings are answered by tungstenite itself.
            _ => {}
        }
    }

    let _ = writer.close().await;

    let (code, reason) = match &close_frame {
        Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_string()),
        None => (1006, String::new()),
    };
    info!(
        connection_id = %ctx.connection_id,
        %remote_addr,
        code,
        %reason,
        "client disconnected"
    );

    Ok(())
}
