//! Per-venue WebSocket client with automatic reconnection.
//!
//! The client owns a background task running the connection loop. On close it
//! reconnects with exponential backoff `delay · 2^(attempt-1)` bounded by
//! `max_reconnect_attempts`, re-issues every remembered subscription after a
//! successful reconnect, and force-reconnects when no message arrives within
//! twice the heartbeat interval.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use vela_types::{MarketDataKind, Pair, Venue};

use crate::collectors::{parser_for, VenueParser};
use crate::config::VenueConfig;
use crate::metrics::ClientMetrics;
use crate::{MarketDataError, MarketDataEvent, Result};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect budget exhausted; manual restart required
    Failed,
}

/// Events emitted by a venue client
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected,
    Disconnected {
        code: Option<u16>,
        reason: String,
    },
    Error {
        message: String,
    },
    Data(MarketDataEvent),
}

enum Command {
    Subscribe(MarketDataKind, Pair),
    Unsubscribe(MarketDataKind, Pair),
    Disconnect,
}

/// Handle to one venue's WebSocket client
pub struct VenueClient {
    config: VenueConfig,
    parser: Arc<dyn VenueParser>,
    state: Arc<RwLock<ConnectionState>>,
    subscriptions: Arc<RwLock<HashSet<(MarketDataKind, Pair)>>>,
    commands: mpsc::Sender<Command>,
    commands_rx: parking_lot::Mutex<Option<mpsc::Receiver<Command>>>,
    metrics: Arc<ClientMetrics>,
}

impl VenueClient {
    pub fn new(config: VenueConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        Self {
            parser: Arc::from(parser_for(config.venue)),
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
            commands: commands_tx,
            commands_rx: parking_lot::Mutex::new(Some(commands_rx)),
            metrics: Arc::new(ClientMetrics::default()),
        }
    }

    pub fn venue(&self) -> Venue {
        self.config.venue
    }

    pub fn metrics(&self) -> &ClientMetrics {
        &self.metrics
    }

    pub async fn status(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Spawn the connection loop, emitting [`ClientEvent`]s on `events`
    pub fn connect(&self, events: mpsc::Sender<ClientEvent>) -> Result<()> {
        let Some(commands) = self.commands_rx.lock().take() else {
            return Err(MarketDataError::NotRunning { venue: self.config.venue });
        };
        let worker = ConnectionWorker {
            config: self.config.clone(),
            parser: Arc::clone(&self.parser),
            state: Arc::clone(&self.state),
            subscriptions: Arc::clone(&self.subscriptions),
            metrics: Arc::clone(&self.metrics),
            events,
        };
        tokio::spawn(worker.run(commands));
        Ok(())
    }

    /// Remember and (when connected) issue a subscription
    pub async fn subscribe(&self, kind: MarketDataKind, pair: Pair) -> Result<()> {
        self.subscriptions.write().await.insert((kind, pair.clone()));
        self.commands
            .send(Command::Subscribe(kind, pair))
            .await
            .map_err(|_| MarketDataError::NotRunning { venue: self.config.venue })
    }

    pub async fn unsubscribe(&self, kind: MarketDataKind, pair: Pair) -> Result<()> {
        self.subscriptions.write().await.remove(&(kind, pair.clone()));
        self.commands
            .send(Command::Unsubscribe(kind, pair))
            .await
            .map_err(|_| MarketDataError::NotRunning { venue: self.config.venue })
    }

    /// Graceful shutdown; no reconnect afterwards
    pub async fn disconnect(&self) -> Result<()> {
        self.commands
            .send(Command::Disconnect)
            .await
            .map_err(|_| MarketDataError::NotRunning { venue: self.config.venue })
    }
}

struct ConnectionWorker {
    config: VenueConfig,
    parser: Arc<dyn VenueParser>,
    state: Arc<RwLock<ConnectionState>>,
    subscriptions: Arc<RwLock<HashSet<(MarketDataKind, Pair)>>>,
    metrics: Arc<ClientMetrics>,
    events: mpsc::Sender<ClientEvent>,
}

enum SessionEnd {
    /// Remote closed or errored; reconnect
    Lost { code: Option<u16>, reason: String },
    /// Local disconnect request; stop for good
    Shutdown,
}

impl ConnectionWorker {
    async fn run(self, mut commands: mpsc::Receiver<Command>) {
        let venue = self.config.venue;
        let mut attempt: u32 = 0;

        loop {
            *self.state.write().await = if attempt == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            };

            if attempt > 0 {
                if attempt >= self.config.max_reconnect_attempts {
                    error!(%venue, attempts = attempt, "reconnect budget exhausted");
                    *self.state.write().await = ConnectionState::Failed;
                    let _ = self
                        .events
                        .send(ClientEvent::Error {
                            message: format!(
                                "max reconnect attempts ({}) exceeded",
                                self.config.max_reconnect_attempts
                            ),
                        })
                        .await;
                    return;
                }
                let delay = self.config.reconnect_delay_ms * 2u64.pow(attempt - 1);
                info!(%venue, attempt, delay_ms = delay, "reconnecting after backoff");
                self.metrics.record_reconnect_attempt();
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let url = self.config.endpoint();
            let connect = timeout(
                Duration::from_millis(self.config.connect_timeout_ms),
                connect_async(&url),
            )
            .await;

            let mut ws = match connect {
                Ok(Ok((ws, response))) => {
                    info!(%venue, status = %response.status(), "connected");
                    ws
                }
                Ok(Err(e)) => {
                    warn!(%venue, error = %e, "connection failed");
                    attempt += 1;
                    continue;
                }
                Err(_) => {
                    warn!(%venue, timeout_ms = self.config.connect_timeout_ms, "connect timed out");
                    attempt += 1;
                    continue;
                }
            };

            *self.state.write().await = ConnectionState::Connected;
            self.metrics.record_connection();
            attempt = 0;
            let _ = self.events.send(ClientEvent::Connected).await;

            if let Err(e) = self.resubscribe(&mut ws).await {
                warn!(%venue, error = %e, "resubscribe failed");
            }

            match self.session(&mut ws, &mut commands).await {
                SessionEnd::Shutdown => {
                    let _ = ws.close(None).await;
                    *self.state.write().await = ConnectionState::Disconnected;
                    self.metrics.record_disconnection();
                    let _ = self
                        .events
                        .send(ClientEvent::Disconnected { code: None, reason: "shutdown".into() })
                        .await;
                    return;
                }
                SessionEnd::Lost { code, reason } => {
                    warn!(%venue, ?code, %reason, "connection lost");
                    self.metrics.record_disconnection();
                    let _ = self.events.send(ClientEvent::Disconnected { code, reason }).await;
                    attempt = 1;
                }
            }
        }
    }

    /// Re-issue every remembered subscription on a fresh connection
    async fn resubscribe(&self, ws: &mut WsStream) -> Result<()> {
        let subs: Vec<(MarketDataKind, Pair)> =
            self.subscriptions.read().await.iter().cloned().collect();
        for (kind, pair) in subs {
            let frame = self.parser.subscribe_frame(kind, &pair)?;
            ws.send(Message::Text(frame)).await?;
            debug!(venue = %self.config.venue, ?kind, %pair, "subscription issued");
        }
        Ok(())
    }

    /// Drive one connected session until it ends
    async fn session(&self, ws: &mut WsStream, commands: &mut mpsc::Receiver<Command>) -> SessionEnd {
        let venue = self.config.venue;
        let watchdog = Duration::from_millis(self.config.heartbeat_ms * 2);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Subscribe(kind, pair)) => {
                        match self.parser.subscribe_frame(kind, &pair) {
                            Ok(frame) => {
                                if let Err(e) = ws.send(Message::Text(frame)).await {
                                    return SessionEnd::Lost { code: None, reason: e.to_string() };
                                }
                            }
                            Err(e) => warn!(%venue, error = %e, "bad subscribe frame"),
                        }
                    }
                    Some(Command::Unsubscribe(kind, pair)) => {
                        match self.parser.unsubscribe_frame(kind, &pair) {
                            Ok(frame) => {
                                if let Err(e) = ws.send(Message::Text(frame)).await {
                                    return SessionEnd::Lost { code: None, reason: e.to_string() };
                                }
                            }
                            Err(e) => warn!(%venue, error = %e, "bad unsubscribe frame"),
                        }
                    }
                    Some(Command::Disconnect) | None => return SessionEnd::Shutdown,
                },
                message = timeout(watchdog, ws.next()) => match message {
                    // Heartbeat watchdog: silence means the feed is dead even
                    // if TCP still looks healthy.
                    Err(_) => {
                        return SessionEnd::Lost {
                            code: None,
                            reason: format!("no message within {}ms", watchdog.as_millis()),
                        };
                    }
                    Ok(None) => return SessionEnd::Lost { code: None, reason: "stream ended".into() },
                    Ok(Some(Err(e))) => return SessionEnd::Lost { code: None, reason: e.to_string() },
                    Ok(Some(Ok(Message::Text(text)))) => {
                        self.metrics.record_message(text.len());
                        match self.parser.parse(&text) {
                            Ok(events) => {
                                for event in events {
                                    let _ = self.events.send(ClientEvent::Data(event)).await;
                                }
                            }
                            Err(e) => {
                                self.metrics.record_parse_error();
                                debug!(%venue, error = %e, "unparseable frame");
                            }
                        }
                    }
                    Ok(Some(Ok(Message::Ping(payload)))) => {
                        if let Err(e) = ws.send(Message::Pong(payload)).await {
                            return SessionEnd::Lost { code: None, reason: e.to_string() };
                        }
                    }
                    Ok(Some(Ok(Message::Close(frame)))) => {
                        let (code, reason) = frame
                            .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                            .unwrap_or((None, "closed".into()));
                        return SessionEnd::Lost { code, reason };
                    }
                    Ok(Some(Ok(_))) => {}
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_disconnected() {
        let client = VenueClient::new(VenueConfig::for_venue(Venue::Kraken));
        assert_eq!(client.status().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn subscriptions_are_remembered_before_connecting() {
        let client = VenueClient::new(VenueConfig::for_venue(Venue::Binance));
        let pair = Pair::parse("BTC/USDT").unwrap();
        client
            .subscribe(MarketDataKind::Ticker, pair.clone())
            .await
            .unwrap();
        assert!(client
            .subscriptions
            .read()
            .await
            .contains(&(MarketDataKind::Ticker, pair)));
    }
}
