//! Owns the physical duplex connection to the conversational backend:
//! exactly one connection per process, with bounded reconnection and a
//! heartbeat that only runs while connected. Consumers subscribe to a
//! broadcast of transport events; the orchestrator is the only subscriber
//! in practice.

use crate::config::{HeartbeatConfig, ReconnectionConfig};
use crate::error::ChatError;
use crate::protocol::{ClientEvent, ServerEvent};
use async_trait::async_trait;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

/// Everything the transport tells the rest of the system.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    StatusChanged(ConnectionStatus),
    Inbound(ServerEvent),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the connection. Idempotent: calling while connected is a
    /// no-op. The first attempt happens inline so setup failures surface to
    /// the caller; later drops are handled by the reconnection policy.
    async fn connect(&self, credential: Option<String>) -> Result<(), ChatError>;

    /// Tear the connection down. No transport events fire after this returns.
    async fn disconnect(&self);

    fn status(&self) -> ConnectionStatus;

    /// Queue an outbound frame. Dropped with a warning when not connected;
    /// falling back is the orchestrator's job, not the transport's.
    async fn emit(&self, event: ClientEvent);

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Linear backoff per attempt, capped at `delay_max`.
fn backoff_delay(config: &ReconnectionConfig, attempt: u32) -> Duration {
    config.delay.saturating_mul(attempt).min(config.delay_max)
}

/// True when a connection exists or an attempt is underway (including the
/// supervisor's reconnect ladder); a second `connect` must not open another
/// socket while this holds.
fn connection_underway(status: ConnectionStatus) -> bool {
    matches!(
        status,
        ConnectionStatus::Connected | ConnectionStatus::Connecting | ConnectionStatus::Reconnecting
    )
}

fn parse_frame(text: &str) -> Option<ServerEvent> {
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Discarding unparseable frame: {} ({})", text, e);
            None
        }
    }
}

struct Inner {
    endpoint: String,
    reconnection: ReconnectionConfig,
    heartbeat: HeartbeatConfig,
    status: Mutex<ConnectionStatus>,
    events: broadcast::Sender<TransportEvent>,
    out_tx: Mutex<Option<mpsc::Sender<ClientEvent>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn set_status(&self, status: ConnectionStatus) {
        let changed = {
            let mut current = self.status.lock().unwrap();
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        };
        if changed {
            debug!("Connection status -> {:?}", status);
            let _ = self.events.send(TransportEvent::StatusChanged(status));
        }
    }

    fn endpoint_url(&self, credential: Option<&str>) -> Result<Url, ChatError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| ChatError::connection_failed(format!("Invalid endpoint: {}", e)))?;
        if let Some(token) = credential {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

pub struct WsTransport {
    inner: Arc<Inner>,
}

impl WsTransport {
    pub fn new(
        endpoint: impl Into<String>,
        reconnection: ReconnectionConfig,
        heartbeat: HeartbeatConfig,
    ) -> Self {
        let (events, _rx) = broadcast::channel(100);
        Self {
            inner: Arc::new(Inner {
                endpoint: endpoint.into(),
                reconnection,
                heartbeat,
                status: Mutex::new(ConnectionStatus::Disconnected),
                events,
                out_tx: Mutex::new(None),
                supervisor: Mutex::new(None),
            }),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, credential: Option<String>) -> Result<(), ChatError> {
        let status = self.status();
        if connection_underway(status) {
            debug!("connect() while {:?}, reusing the existing connection", status);
            return Ok(());
        }

        let inner = self.inner.clone();
        inner.set_status(ConnectionStatus::Connecting);

        let url = inner.endpoint_url(credential.as_deref())?;
        let ws = match connect_async(url.as_str()).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                inner.set_status(ConnectionStatus::Disconnected);
                return Err(ChatError::connection_failed(format!(
                    "Could not reach {}: {}",
                    inner.endpoint, e
                )));
            }
        };
        info!("Connected to chat backend at {}", inner.endpoint);

        let (out_tx, out_rx) = mpsc::channel::<ClientEvent>(100);
        *inner.out_tx.lock().unwrap() = Some(out_tx);

        // A supervisor that ended in `Error` may still be parked in the
        // slot; there must never be two of them.
        if let Some(old) = inner.supervisor.lock().unwrap().take() {
            old.abort();
        }
        let supervisor = tokio::spawn(supervise(inner.clone(), url, ws, out_rx));
        *inner.supervisor.lock().unwrap() = Some(supervisor);
        Ok(())
    }

    async fn disconnect(&self) {
        let supervisor = self.inner.supervisor.lock().unwrap().take();
        if let Some(handle) = supervisor {
            handle.abort();
            // Wait out the abort so no event can fire after we return.
            let _ = handle.await;
        }
        *self.inner.out_tx.lock().unwrap() = None;
        self.inner.set_status(ConnectionStatus::Disconnected);
        info!("Transport disconnected");
    }

    fn status(&self) -> ConnectionStatus {
        *self.inner.status.lock().unwrap()
    }

    async fn emit(&self, event: ClientEvent) {
        if self.status() != ConnectionStatus::Connected {
            warn!("Cannot emit while not connected, dropping frame: {:?}", event);
            return;
        }
        let tx = self.inner.out_tx.lock().unwrap().clone();
        match tx {
            Some(tx) => {
                if tx.send(event).await.is_err() {
                    warn!("Outbound channel closed, frame dropped");
                }
            }
            None => warn!("No outbound channel, frame dropped"),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }
}

/// Runs one connection at a time: pumps inbound frames, outbound frames and
/// the heartbeat; on drop walks the bounded reconnection ladder, ending in
/// `Error` once attempts are exhausted.
async fn supervise(
    inner: Arc<Inner>,
    url: Url,
    mut ws: WsStream,
    mut out_rx: mpsc::Receiver<ClientEvent>,
) {
    loop {
        inner.set_status(ConnectionStatus::Connected);
        let (mut sink, mut stream) = ws.split();
        let mut heartbeat = tokio::time::interval(inner.heartbeat.interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Skip the interval's immediate first tick.
        heartbeat.tick().await;

        let reason: &str = loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = parse_frame(&text) {
                            let _ = inner.events.send(TransportEvent::Inbound(event));
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break "pong write failed";
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break "closed by server",
                    Some(Ok(_)) => {} // binary/pong frames are not part of the protocol
                    Some(Err(e)) => {
                        error!("Websocket read error: {}", e);
                        break "read error";
                    }
                },
                outbound = out_rx.recv() => match outbound {
                    Some(event) => {
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                if let Err(e) = sink.send(Message::Text(json)).await {
                                    warn!("Failed to write frame: {}", e);
                                    break "write error";
                                }
                            }
                            Err(e) => warn!("Failed to serialize outbound frame: {}", e),
                        }
                    }
                    None => break "shutdown",
                },
                _ = heartbeat.tick() => {
                    let ping = ClientEvent::Heartbeat {
                        timestamp: Utc::now().timestamp_millis(),
                    };
                    match serde_json::to_string(&ping) {
                        Ok(json) => {
                            if let Err(e) = sink.send(Message::Text(json)).await {
                                warn!("Heartbeat write failed: {}", e);
                                break "heartbeat failed";
                            }
                        }
                        Err(e) => warn!("Failed to serialize heartbeat: {}", e),
                    }
                }
            }
        };

        // The heartbeat dies with this scope; it must not tick on a dead
        // socket while we are reconnecting.
        info!("Connection lost ({})", reason);
        if reason == "shutdown" || !inner.reconnection.enabled {
            inner.set_status(ConnectionStatus::Disconnected);
            return;
        }

        let mut reconnected = None;
        for attempt in 1..=inner.reconnection.attempts {
            inner.set_status(ConnectionStatus::Reconnecting);
            let delay = backoff_delay(&inner.reconnection, attempt);
            debug!("Reconnect attempt {} in {:?}", attempt, delay);
            tokio::time::sleep(delay).await;
            match connect_async(url.as_str()).await {
                Ok((ws2, _response)) => {
                    info!("Reconnected on attempt {}", attempt);
                    reconnected = Some(ws2);
                    break;
                }
                Err(e) => warn!("Reconnect attempt {} failed: {}", attempt, e),
            }
        }

        match reconnected {
            Some(ws2) => ws = ws2,
            None => {
                error!("Reconnection attempts exhausted");
                inner.set_status(ConnectionStatus::Error);
                *inner.out_tx.lock().unwrap() = None;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatConfig;
    use pretty_assertions::assert_eq;

    #[test]
    fn backoff_grows_linearly_then_caps() {
        let config = ReconnectionConfig {
            enabled: true,
            delay: Duration::from_millis(1000),
            delay_max: Duration::from_millis(3500),
            attempts: 10,
        };
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(3000));
        assert_eq!(backoff_delay(&config, 4), Duration::from_millis(3500));
        assert_eq!(backoff_delay(&config, 9), Duration::from_millis(3500));
    }

    #[test]
    fn connect_is_a_noop_while_an_attempt_is_underway() {
        assert!(connection_underway(ConnectionStatus::Connected));
        assert!(connection_underway(ConnectionStatus::Connecting));
        assert!(connection_underway(ConnectionStatus::Reconnecting));
        assert!(!connection_underway(ConnectionStatus::Disconnected));
        assert!(!connection_underway(ConnectionStatus::Error));
    }

    #[test]
    fn frames_parse_into_server_events() {
        let event = parse_frame(r#"{"event":"conversation_closed","data":{}}"#);
        assert!(matches!(event, Some(ServerEvent::ConversationClosed { .. })));
        assert_eq!(parse_frame("not json"), None);
    }

    #[tokio::test]
    async fn transport_starts_disconnected_and_tolerates_blind_emit() {
        let config = ChatConfig::default();
        let transport = WsTransport::new(
            config.endpoint.clone(),
            config.reconnection.clone(),
            config.heartbeat.clone(),
        );
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
        // Not connected: the frame is dropped with a warning, no panic.
        transport
            .emit(ClientEvent::Heartbeat { timestamp: 0 })
            .await;
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn connect_failure_surfaces_and_resets_status() {
        let transport = WsTransport::new(
            "ws://127.0.0.1:1", // nothing listens here
            ReconnectionConfig::default(),
            HeartbeatConfig::default(),
        );
        let err = transport.connect(None).await.expect_err("must fail");
        assert!(!err.message.is_empty());
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
    }
}
