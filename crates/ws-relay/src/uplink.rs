use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Delay between a link failure and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("upstream link is not connected")]
    Unavailable,
}

/// Where a frame accepted by the gateway goes next.
pub trait UplinkSink: Send + Sync {
    /// Hand one reframed tile to the backend. Never queues: if the backend
    /// is not reachable right now the frame is refused.
    fn forward(&self, payload: Vec<u8>) -> Result<(), LinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Configuration for the backend connection.
#[derive(Debug, Clone)]
pub struct UplinkConfig {
    /// WebSocket URL of the backend, e.g. `ws://127.0.0.1:9000/tiles`.
    pub url: String,
    pub reconnect_delay: Duration,
}

// ---------------------------------------------------------------------------
// ReconnectTimer
// ---------------------------------------------------------------------------

/// A single pending reconnect attempt.
///
/// [`schedule`](Self::schedule) arms the timer, or pushes an armed timer's
/// deadline out to a full delay from now. Any number of failure reports
/// inside one delay window therefore leave exactly one attempt pending, and
/// the delay never grows.
pub struct ReconnectTimer {
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ReconnectTimer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, sleep: None }
    }

    pub fn schedule(&mut self) {
        let deadline = Instant::now() + self.delay;
        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().reset(deadline),
            None => self.sleep = Some(Box::pin(tokio::time::sleep_until(deadline))),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    #[cfg(test)]
    fn deadline(&self) -> Option<Instant> {
        self.sleep.as_ref().map(|sleep| sleep.deadline())
    }

    /// Wait for the pending attempt, then disarm. Returns immediately when
    /// nothing is scheduled.
    pub async fn wait(&mut self) {
        if let Some(sleep) = self.sleep.as_mut() {
            sleep.as_mut().await;
        }
        self.sleep = None;
    }
}

// ---------------------------------------------------------------------------
// UpstreamLink
// ---------------------------------------------------------------------------

struct Shared {
    url: String,
    state: watch::Sender<LinkState>,
    /// Present only while connected. Frames left in the channel when the
    /// connection drops are discarded with it.
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl Shared {
    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Vec<u8>>>> {
        self.outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn attach(&self, tx: mpsc::UnboundedSender<Vec<u8>>) {
        *self.outbound() = Some(tx);
        self.state.send_replace(LinkState::Connected);
    }

    fn detach(&self, next: LinkState) {
        self.outbound().take();
        self.state.send_replace(next);
    }
}

/// The single persistent connection to the tile backend.
///
/// Cloning yields another handle to the same connection. A background task
/// owns the socket and reconnects forever; callers only see
/// [`send`](Self::send) succeed or fail with [`LinkError::Unavailable`].
#[derive(Clone)]
pub struct UpstreamLink {
    shared: Arc<Shared>,
    driver: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl UpstreamLink {
    /// Start connecting in the background. Must be called inside a tokio
    /// runtime.
    pub fn spawn(config: UplinkConfig) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        let shared = Arc::new(Shared {
            url: config.url,
            state,
            outbound: Mutex::new(None),
        });

        let driver = tokio::spawn(drive(Arc::clone(&shared), config.reconnect_delay));

        Self {
            shared,
            driver: Arc::new(Mutex::new(Some(driver))),
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn state(&self) -> LinkState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.shared.state.subscribe()
    }

    /// Send one binary frame to the backend, fire-and-forget.
    pub fn send(&self, payload: Vec<u8>) -> Result<(), LinkError> {
        match self.shared.outbound().as_ref() {
            Some(tx) => tx.send(payload).map_err(|_| LinkError::Unavailable),
            None => Err(LinkError::Unavailable),
        }
    }

    /// Stop the background task and drop the connection.
    pub fn shutdown(&self) {
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(driver) = driver {
            driver.abort();
            info!(uplink = %self.shared.url, "upstream link stopped");
        }
        self.shared.detach(LinkState::Disconnected);
    }
}

impl UplinkSink for UpstreamLink {
    fn forward(&self, payload: Vec<u8>) -> Result<(), LinkError> {
        self.send(payload)
    }
}

/// Connect, relay, and reconnect until aborted.
async fn drive(shared: Arc<Shared>, reconnect_delay: Duration) {
    let mut timer = ReconnectTimer::new(reconnect_delay);

    loop {
        timer.wait().await;

        shared.state.send_replace(LinkState::Connecting);
        info!(uplink = %shared.url, "connecting to tile backend");

        match tokio_tungstenite::connect_async(shared.url.as_str()).await {
            Ok((ws, _)) => {
                info!(uplink = %shared.url, "connected to tile backend");
                run_connection(&shared, ws, &mut timer).await;
                info!(
                    uplink = %shared.url,
                    delay_secs = reconnect_delay.as_secs_f64(),
                    "connection to tile backend closed; reconnect scheduled"
                );
            }
            Err(err) => {
                warn!(
                    uplink = %shared.url,
                    %err,
                    delay_secs = reconnect_delay.as_secs_f64(),
                    "failed to connect to tile backend; reconnect scheduled"
                );
                shared.state.send_replace(LinkState::Disconnected);
                timer.schedule();
            }
        }
    }
}

/// Pump outbound frames until the connection ends. Every error and the
/// final close each report to `timer`.
async fn run_connection(
    shared: &Shared,
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    timer: &mut ReconnectTimer,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    shared.attach(tx);

    let (mut writer, mut reader) = ws.split();

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(payload) = frame else { break };
                if let Err(err) = writer.send(Message::Binary(payload.into())).await {
                    warn!(uplink = %shared.url, %err, "failed to send frame to tile backend");
                    timer.schedule();
                    break;
                }
            }
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Close(frame))) => {
                    debug!(uplink = %shared.url, ?frame, "tile backend closed the connection");
                    break;
                }
                Some(Ok(_)) => {
                    debug!(uplink = %shared.url, "ignoring frame from tile backend");
                }
                Some(Err(err)) => {
                    warn!(uplink = %shared.url, %err, "tile backend connection error");
                    timer.schedule();
                    break;
                }
                None => break,
            },
        }
    }

    shared.detach(LinkState::Disconnected);
    timer.schedule();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    // -- helpers ----------------------------------------------------------

    async fn wait_for_state(link: &UpstreamLink, target: LinkState) {
        let mut rx = link.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            while *rx.borrow_and_update() != target {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap_or_else(|_| panic!("link never reached {target:?}"));
    }

    async fn backend() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    fn config(url: String, delay_ms: u64) -> UplinkConfig {
        UplinkConfig {
            url,
            reconnect_delay: Duration::from_millis(delay_ms),
        }
    }

    // -- ReconnectTimer ---------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_leave_one_pending_attempt() {
        let delay = Duration::from_secs(5);
        let mut timer = ReconnectTimer::new(delay);
        let start = Instant::now();

        timer.schedule();
        tokio::time::advance(Duration::from_secs(2)).await;
        timer.schedule();
        tokio::time::advance(Duration::from_secs(2)).await;
        timer.schedule();

        assert!(timer.is_armed());
        assert_eq!(timer.deadline(), Some(start + Duration::from_secs(9)));

        timer.wait().await;
        assert!(Instant::now() >= start + Duration::from_secs(9));
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn delay_does_not_grow_between_attempts() {
        let delay = Duration::from_secs(5);
        let mut timer = ReconnectTimer::new(delay);

        for _ in 0..3 {
            let before = Instant::now();
            timer.schedule();
            assert_eq!(timer.deadline(), Some(before + delay));
            timer.wait().await;
        }
    }

    #[tokio::test]
    async fn unarmed_timer_does_not_block() {
        let mut timer = ReconnectTimer::new(Duration::from_secs(3600));
        tokio::time::timeout(Duration::from_secs(1), timer.wait())
            .await
            .expect("unarmed wait should return immediately");
    }

    // -- UpstreamLink -----------------------------------------------------

    #[tokio::test]
    async fn send_before_connect_is_unavailable() {
        let (listener, url) = backend().await;
        drop(listener);

        let link = UpstreamLink::spawn(config(url, 50));
        assert_eq!(link.send(vec![1, 2, 3]), Err(LinkError::Unavailable));
        assert_ne!(link.state(), LinkState::Connected);
        link.shutdown();
    }

    #[tokio::test]
    async fn failed_connect_reports_disconnected() {
        let (listener, url) = backend().await;
        drop(listener);

        let link = UpstreamLink::spawn(config(url, 30_000));
        let mut rx = link.subscribe();
        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                rx.changed().await.unwrap();
                let state = *rx.borrow_and_update();
                seen.push(state);
                if state == LinkState::Disconnected {
                    break;
                }
            }
        })
        .await
        .expect("link never left Connecting");

        assert_eq!(seen.last(), Some(&LinkState::Disconnected));
        // Still waiting out the 30 s delay, and not stuck in Connecting.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(link.state(), LinkState::Disconnected);
        link.shutdown();
    }

    #[tokio::test]
    async fn frames_reach_the_backend_as_binary() {
        let (listener, url) = backend().await;
        let link = UpstreamLink::spawn(config(url, 50));

        let (stream, _) = listener.accept().await.unwrap();
        let mut server = tokio_tungstenite::accept_async(stream).await.unwrap();
        wait_for_state(&link, LinkState::Connected).await;

        link.send(vec![0x00, 0x0C, 0xFF, 0xFD, 0xAA]).unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(5), server.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match msg {
            Message::Binary(data) => assert_eq!(&data[..], &[0x00, 0x0C, 0xFF, 0xFD, 0xAA]),
            other => panic!("expected binary frame, got {:?}", other),
        }
        link.shutdown();
    }

    #[tokio::test]
    async fn reconnects_after_backend_drops_connection() {
        let (listener, url) = backend().await;
        let link = UpstreamLink::spawn(config(url, 100));

        let (stream, _) = listener.accept().await.unwrap();
        let mut first = tokio_tungstenite::accept_async(stream).await.unwrap();
        wait_for_state(&link, LinkState::Connected).await;
        first.close(None).await.unwrap();
        drop(first);

        let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("link did not reconnect")
            .unwrap();
        let _second = tokio_tungstenite::accept_async(stream).await.unwrap();
        wait_for_state(&link, LinkState::Connected).await;
        assert!(link.send(vec![9]).is_ok());
        link.shutdown();
    }

    #[tokio::test]
    async fn shutdown_leaves_link_disconnected() {
        let (listener, url) = backend().await;
        let link = UpstreamLink::spawn(config(url, 50));

        let (stream, _) = listener.accept().await.unwrap();
        let _server = tokio_tungstenite::accept_async(stream).await.unwrap();
        wait_for_state(&link, LinkState::Connected).await;

        link.shutdown();
        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(link.send(vec![1]), Err(LinkError::Unavailable));
    }
}
