//! Order event stream client.
//!
//! The push channel is at-most-once: events emitted while disconnected are
//! gone. Recovery is pull-based: every successful (re)connect is followed by
//! a full snapshot fetch, and each event then upserts one complete order. The
//! subscription is opened before the snapshot is requested so nothing falls
//! between the two. No ordering is assumed across a reconnect.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::StreamError;
use crate::kitchen::KitchenBoard;
use crate::orders::OrderProjection;

const STREAM_PATH: &str = "/api/pos/orders/stream";

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum OrderEvent {
    Created(OrderProjection),
    Updated(OrderProjection),
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(alias = "event", alias = "kind")]
    r#type: String,
    #[serde(alias = "payload", alias = "data")]
    order: Option<serde_json::Value>,
}

impl OrderEvent {
    pub fn order(&self) -> &OrderProjection {
        match self {
            OrderEvent::Created(order) | OrderEvent::Updated(order) => order,
        }
    }

    pub fn into_order(self) -> OrderProjection {
        match self {
            OrderEvent::Created(order) | OrderEvent::Updated(order) => order,
        }
    }

    /// Parse one text frame. Event types this client does not handle yield
    /// `Ok(None)`.
    pub fn parse(frame: &str) -> Result<Option<Self>, StreamError> {
        let raw: RawEvent = serde_json::from_str(frame)
            .map_err(|e| StreamError::Protocol(format!("bad event frame: {e}")))?;
        let created = match raw.r#type.trim().to_ascii_lowercase().as_str() {
            "order.created" | "order_created" | "insert" => true,
            "order.updated" | "order_updated" | "update" => false,
            _ => return Ok(None),
        };
        let payload = raw
            .order
            .ok_or_else(|| StreamError::Protocol("event without order payload".into()))?;
        let order: OrderProjection = serde_json::from_value(payload)
            .map_err(|e| StreamError::Protocol(format!("bad order payload: {e}")))?;
        Ok(Some(if created {
            OrderEvent::Created(order)
        } else {
            OrderEvent::Updated(order)
        }))
    }
}

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PushSource: Send + Sync {
    /// Open a fresh subscription.
    async fn connect(&self) -> Result<Box<dyn PushConnection>, StreamError>;
}

#[async_trait]
pub trait PushConnection: Send {
    /// Next event. `None` means the connection is gone. `Protocol` errors
    /// are per-frame and the connection stays usable; any other error ends it.
    async fn next_event(&mut self) -> Option<Result<OrderEvent, StreamError>>;

    async fn close(&mut self);
}

/// WebSocket push channel on the admin dashboard.
pub struct WebSocketPushSource {
    url: String,
    api_key: String,
    terminal_id: String,
}

impl WebSocketPushSource {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            url: stream_url(&config.admin_url),
            api_key: config.api_key.clone(),
            terminal_id: config.terminal_id.clone(),
        }
    }
}

/// `https://host` → `wss://host/api/pos/orders/stream`.
pub fn stream_url(admin_url: &str) -> String {
    let ws_base = if let Some(rest) = admin_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = admin_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        admin_url.to_string()
    };
    format!("{ws_base}{STREAM_PATH}")
}

fn header(value: &str) -> Result<HeaderValue, StreamError> {
    HeaderValue::from_str(value).map_err(|e| StreamError::Connect(format!("bad header: {e}")))
}

#[async_trait]
impl PushSource for WebSocketPushSource {
    async fn connect(&self) -> Result<Box<dyn PushConnection>, StreamError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        let headers = request.headers_mut();
        headers.insert("x-pos-api-key", header(&self.api_key)?);
        headers.insert("x-terminal-id", header(&self.terminal_id)?);

        let (socket, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        debug!(status = response.status().as_u16(), "Push channel handshake complete");
        Ok(Box::new(WebSocketConnection { socket }))
    }
}

struct WebSocketConnection {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushConnection for WebSocketConnection {
    async fn next_event(&mut self) -> Option<Result<OrderEvent, StreamError>> {
        loop {
            let frame = match self.socket.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(StreamError::Transport(e.to_string()))),
            };
            let text = match frame {
                Message::Text(text) => text,
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        return Some(Err(StreamError::Protocol("non-utf8 binary frame".into())))
                    }
                },
                Message::Close(_) => return None,
                // tungstenite answers pings itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };
            match OrderEvent::parse(&text) {
                Ok(Some(event)) => return Some(Ok(event)),
                Ok(None) => debug!("Ignoring unhandled push event"),
                Err(e) => return Some(Err(e)),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.socket.close(None).await;
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

fn deterministic_jitter_ms(seed: u64) -> u64 {
    (seed.wrapping_mul(7919) % 700) + 50
}

/// Exponential from `min`, capped at `max`, plus up to a quarter of the base
/// as jitter.
pub fn reconnect_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let base = min.saturating_mul(1u32 << exp).min(max);
    let base_ms = base.as_millis() as u64;
    let jitter = deterministic_jitter_ms(u64::from(attempt)).min(base_ms / 4);
    base + Duration::from_millis(jitter)
}

pub struct EventStreamClient {
    source: Arc<dyn PushSource>,
    board: Arc<KitchenBoard>,
    min_delay: Duration,
    max_delay: Duration,
}

enum SessionEnd {
    Disconnected {
        recovered: bool,
        reason: Option<StreamError>,
    },
    Shutdown,
}

impl EventStreamClient {
    pub fn new(
        source: Arc<dyn PushSource>,
        board: Arc<KitchenBoard>,
        min_delay: Duration,
        max_delay: Duration,
    ) -> Self {
        Self {
            source,
            board,
            min_delay,
            max_delay,
        }
    }

    /// Connect, recover, stream, and reconnect until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Order event stream started");
        let mut attempt: u32 = 0;

        loop {
            let connected = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.source.connect() => result,
            };

            match connected {
                Ok(mut conn) => {
                    match self.session(conn.as_mut(), &shutdown).await {
                        SessionEnd::Shutdown => {
                            conn.close().await;
                            break;
                        }
                        SessionEnd::Disconnected { recovered, reason } => {
                            conn.close().await;
                            match reason {
                                Some(e) => warn!("Order event stream lost: {e}"),
                                None => info!("Order event stream closed by server"),
                            }
                            // A session that got as far as its snapshot resets the backoff.
                            if recovered {
                                attempt = 0;
                            }
                        }
                    }
                }
                Err(e) => warn!("Order event stream connect failed: {e}"),
            }

            attempt = attempt.saturating_add(1);
            let delay = reconnect_delay(attempt, self.min_delay, self.max_delay);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting order event stream");
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("Order event stream stopped");
    }

    async fn session(
        &self,
        conn: &mut dyn PushConnection,
        shutdown: &CancellationToken,
    ) -> SessionEnd {
        let recovered = tokio::select! {
            _ = shutdown.cancelled() => return SessionEnd::Shutdown,
            result = self.board.refresh_snapshot() => result,
        };
        if let Err(e) = recovered {
            return SessionEnd::Disconnected {
                recovered: false,
                reason: Some(StreamError::Transport(format!(
                    "snapshot recovery failed: {e}"
                ))),
            };
        }

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => return SessionEnd::Shutdown,
                next = conn.next_event() => next,
            };
            match next {
                None => {
                    return SessionEnd::Disconnected {
                        recovered: true,
                        reason: None,
                    }
                }
                Some(Ok(event)) => {
                    debug!(order_id = %event.order().order_id, "Push event");
                    self.board.apply_push(event.into_order());
                }
                Some(Err(StreamError::Protocol(e))) => warn!("Skipping push frame: {e}"),
                Some(Err(e)) => {
                    return SessionEnd::Disconnected {
                        recovered: true,
                        reason: Some(e),
                    }
                }
            }
        }
    }
}
