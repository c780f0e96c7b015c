//! shardwatch observer client.
//!
//! ```ignore
//! let mut watch = WatchClient::spawn("http://status.example:8080");
//! let mut mirror = FleetMirror::default();
//! while let Some(event) = watch.next_event().await {
//!     mirror.apply(&event);
//! }
//! ```
//!
//! The server sends a Hello snapshot on connect, one Update per committed
//! shard status, and a Tick every few seconds. A connection that stays
//! silent for longer than the liveness window is treated as dead.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Three missed ticks at the server's default 5 s heartbeat.
pub const DEFAULT_LIVENESS: Duration = Duration::from_secs(15);

// ═══════════════════════════════════════════════════════════════
// Wire types
// ═══════════════════════════════════════════════════════════════

pub type FleetState = BTreeMap<u32, BTreeMap<u32, u8>>;

/// One frame from the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "lowercase")]
pub enum InboundMessage {
    Hello(Hello),
    Update(ShardUpdate),
    Tick(bool),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub total_shards: u32,
    pub total_patrons: u32,
    pub patron_shards: u32,
    /// bot → shard → status
    pub state: FleetState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ShardUpdate {
    pub bot: u32,
    pub shard: u32,
    pub status: u8,
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("connection failed: {0}")]
    Connect(#[source] tungstenite::Error),

    #[error("stream error: {0}")]
    Stream(#[source] tungstenite::Error),

    #[error("server closed the stream")]
    Closed,

    #[error("no frame within {0:?}")]
    Silent(Duration),

    #[error("undecodable frame: {0}")]
    Decode(#[from] serde_json::Error),
}

// ═══════════════════════════════════════════════════════════════
// Single connection
// ═══════════════════════════════════════════════════════════════

/// One observer session. No reconnection; see [`WatchClient`] for that.
pub struct ObserverConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    liveness: Duration,
}

impl ObserverConnection {
    pub async fn connect(endpoint: &str, liveness: Duration) -> Result<Self, WatchError> {
        let url = normalize_socket_url(endpoint);
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(WatchError::Connect)?;
        debug!(url = %url, "observer connected");
        Ok(Self { ws, liveness })
    }

    /// Next decoded frame. Fails if nothing (not even a ping) arrives
    /// within the liveness window.
    pub async fn next_message(&mut self) -> Result<InboundMessage, WatchError> {
        loop {
            let frame = tokio::time::timeout(self.liveness, self.ws.next())
                .await
                .map_err(|_| WatchError::Silent(self.liveness))?;
            match frame {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Close(_))) | None => return Err(WatchError::Closed),
                Some(Ok(_)) => {} // ping/pong/binary
                Some(Err(e)) => return Err(WatchError::Stream(e)),
            }
        }
    }
}

/// Accepts ws(s):// or http(s):// endpoints, with or without the socket path.
pub fn normalize_socket_url(endpoint: &str) -> String {
    let url = endpoint
        .replace("https://", "wss://")
        .replace("http://", "ws://");
    if url.contains("/api/socket") {
        url
    } else {
        format!("{}/api/socket", url.trim_end_matches('/'))
    }
}

// ═══════════════════════════════════════════════════════════════
// Reconnecting client
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    Hello(Hello),
    Update(ShardUpdate),
    Tick,
    /// The session ended; a fresh Hello follows on reconnect.
    Disconnected,
}

impl From<InboundMessage> for ObserverEvent {
    fn from(msg: InboundMessage) -> Self {
        match msg {
            InboundMessage::Hello(hello) => ObserverEvent::Hello(hello),
            InboundMessage::Update(update) => ObserverEvent::Update(update),
            InboundMessage::Tick(_) => ObserverEvent::Tick,
        }
    }
}

/// Observer that stays connected.
///
/// Internally spawns a background tokio task that owns the WebSocket and
/// reconnects with exponential backoff + jitter. Dropping the client stops
/// the task.
pub struct WatchClient {
    events: mpsc::Receiver<ObserverEvent>,
    task: JoinHandle<()>,
}

impl WatchClient {
    pub fn spawn(endpoint: &str) -> Self {
        Self::spawn_with(endpoint, DEFAULT_LIVENESS)
    }

    pub fn spawn_with(endpoint: &str, liveness: Duration) -> Self {
        let (tx, events) = mpsc::channel(256);
        let endpoint = endpoint.to_string();
        let task = tokio::spawn(async move {
            watch_task(endpoint, liveness, tx).await;
        });
        Self { events, task }
    }

    /// Next event; `None` once the background task has stopped.
    pub async fn next_event(&mut self) -> Option<ObserverEvent> {
        self.events.recv().await
    }
}

impl Drop for WatchClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn watch_task(endpoint: String, liveness: Duration, tx: mpsc::Sender<ObserverEvent>) {
    let mut attempt: u32 = 0;
    loop {
        match ObserverConnection::connect(&endpoint, liveness).await {
            Ok(mut conn) => {
                info!(endpoint = %endpoint, "watching");
                loop {
                    match conn.next_message().await {
                        Ok(msg) => {
                            attempt = 0;
                            if tx.send(msg.into()).await.is_err() {
                                return; // client dropped
                            }
                        }
                        Err(e) => {
                            warn!("observer session ended: {e}");
                            break;
                        }
                    }
                }
                if tx.send(ObserverEvent::Disconnected).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!(endpoint = %endpoint, attempt, "{e}"),
        }

        tokio::select! {
            _ = backoff_sleep(attempt) => {}
            _ = tx.closed() => return,
        }
        attempt = attempt.saturating_add(1);
    }
}

/// delay = min(100ms × 2^attempt, 30s) + random(0, delay × 0.5)
async fn backoff_sleep(attempt: u32) {
    let base_ms = 100u64.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
    let capped_ms = base_ms.min(30_000);
    let jitter_ms = (rand::random::<f64>() * capped_ms as f64 * 0.5) as u64;
    let total = Duration::from_millis(capped_ms + jitter_ms);
    debug!(ms = total.as_millis(), attempt, "backoff sleep");
    tokio::time::sleep(total).await;
}

// ═══════════════════════════════════════════════════════════════
// Local mirror
// ═══════════════════════════════════════════════════════════════

/// Local copy of the server's fleet state, kept current from events.
#[derive(Debug, Clone, Default)]
pub struct FleetMirror {
    state: FleetState,
    topology: Option<(u32, u32, u32)>,
    synced: bool,
}

impl FleetMirror {
    /// Fold one event in. Returns true if the state changed.
    pub fn apply(&mut self, event: &ObserverEvent) -> bool {
        match event {
            ObserverEvent::Hello(hello) => {
                self.state = hello.state.clone();
                self.topology = Some((hello.total_shards, hello.total_patrons, hello.patron_shards));
                self.synced = true;
                true
            }
            ObserverEvent::Update(u) => {
                let shards = self.state.entry(u.bot).or_default();
                shards.insert(u.shard, u.status) != Some(u.status)
            }
            ObserverEvent::Tick => false,
            ObserverEvent::Disconnected => {
                self.synced = false;
                false
            }
        }
    }

    /// Status of one shard; `None` when never reported.
    pub fn status(&self, bot: u32, shard: u32) -> Option<u8> {
        self.state.get(&bot)?.get(&shard).copied()
    }

    /// False until the first Hello and after every disconnect.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// `(total_shards, total_patrons, patron_shards)` from the last Hello.
    pub fn topology(&self) -> Option<(u32, u32, u32)> {
        self.topology
    }

    /// Number of shards currently in each status.
    pub fn summary(&self) -> BTreeMap<u8, usize> {
        let mut counts = BTreeMap::new();
        for status in self.state.values().flat_map(BTreeMap::values) {
            *counts.entry(*status).or_insert(0) += 1;
        }
        counts
    }
}

// ═══════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════
