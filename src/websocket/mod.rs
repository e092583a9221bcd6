use crate::error::BackendError;
use crate::models::events::ChannelEvent;
use crate::models::websocket::{poll_topic, ClientMessage, InsertFilter, ServerMessage};
use crate::presence::PresenceSet;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use reqwest::Url;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const VOTES_TABLE: &str = "votes";

/// A live server-side registration. Closing twice is a no-op.
pub trait Subscription: Send {
    fn close(&mut self);
}

/// Change and presence notifications scoped to one poll.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn subscribe_inserts(
        &self,
        poll_id: &str,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Result<Box<dyn Subscription>, BackendError>;

    async fn subscribe_presence(
        &self,
        poll_id: &str,
        presence_key: &str,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Result<Box<dyn Subscription>, BackendError>;
}

pub struct WsHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl WsHandle {
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            info!("Shutting down WebSocket");
            let _ = tx.send(());
        }
    }
}

impl Subscription for WsHandle {
    fn close(&mut self) {
        self.shutdown();
    }
}

impl Drop for WsHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// Consecutive failed reconnects before the channel gives up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelKind {
    Inserts,
    Presence,
}

#[derive(Debug, Clone)]
struct Join {
    url: String,
    topic: String,
    message: String,
    kind: ChannelKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpExit {
    Shutdown,
    Dropped,
}

/// `RealtimeChannel` over a JSON websocket protocol, one connection per subscription.
#[derive(Debug, Clone)]
pub struct WsRealtime {
    url: String,
    access_token: String,
    reconnect: ReconnectPolicy,
    heartbeat: Duration,
}

impl WsRealtime {
    pub fn new(
        base_url: &str,
        api_key: &str,
        access_token: Option<String>,
        reconnect: ReconnectPolicy,
        heartbeat: Duration,
    ) -> Result<Self, BackendError> {
        let mut url = Url::parse(base_url)
            .map_err(|e| BackendError::Malformed(format!("realtime url {}: {}", base_url, e)))?;
        url.query_pairs_mut().append_pair("apikey", api_key);
        Ok(Self {
            url: url.into(),
            access_token: access_token.unwrap_or_else(|| api_key.to_owned()),
            reconnect,
            heartbeat: heartbeat.max(Duration::from_secs(1)),
        })
    }

    async fn open(
        &self,
        topic: String,
        message: &ClientMessage<'_>,
        kind: ChannelKind,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Result<Box<dyn Subscription>, BackendError> {
        let join = Join {
            url: self.url.clone(),
            topic,
            message: serde_json::to_string(message)?,
            kind,
        };
        let handle = run_websocket(join, self.reconnect, self.heartbeat, events).await?;
        Ok(Box::new(handle))
    }
}

#[async_trait]
impl RealtimeChannel for WsRealtime {
    async fn subscribe_inserts(
        &self,
        poll_id: &str,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Result<Box<dyn Subscription>, BackendError> {
        let topic = poll_topic(poll_id);
        let message = ClientMessage::SubscribeInserts {
            topic: topic.clone(),
            access_token: &self.access_token,
            changes: InsertFilter {
                table: VOTES_TABLE,
                filter: format!("poll_id=eq.{}", poll_id),
            },
        };
        self.open(topic, &message, ChannelKind::Inserts, events).await
    }

    async fn subscribe_presence(
        &self,
        poll_id: &str,
        presence_key: &str,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Result<Box<dyn Subscription>, BackendError> {
        let topic = poll_topic(poll_id);
        let message = ClientMessage::TrackPresence {
            topic: topic.clone(),
            access_token: &self.access_token,
            key: presence_key,
        };
        self.open(topic, &message, ChannelKind::Presence, events).await
    }
}

async fn connect_and_join(join: &Join) -> Result<WsStream, BackendError> {
    debug!("Connecting to realtime channel {}", join.topic);
    let (mut ws_stream, _) = tokio_tungstenite::connect_async(join.url.as_str()).await?;
    ws_stream.send(Message::text(join.message.clone())).await?;
    Ok(ws_stream)
}

/// Connects once, then keeps the channel alive on a spawned task until the
/// returned handle is shut down or dropped.
async fn run_websocket(
    join: Join,
    policy: ReconnectPolicy,
    heartbeat: Duration,
    events: mpsc::UnboundedSender<ChannelEvent>,
) -> Result<WsHandle, BackendError> {
    let first = connect_and_join(&join).await?;
    info!("Realtime channel {} established ({:?})", join.topic, join.kind);

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        let mut stream = Some(first);
        let mut failures = 0u32;

        loop {
            if let Some(ws) = stream.take() {
                let exit = pump(ws, &join, heartbeat, &events, &mut shutdown_rx).await;
                if exit == PumpExit::Shutdown {
                    return;
                }
                warn!("Realtime channel {} dropped", join.topic);
            }

            if failures >= policy.max_attempts {
                give_up(&join, failures, &events);
                return;
            }

            info!(
                "Reconnecting to realtime channel {} in {:?}",
                join.topic, policy.delay
            );
            tokio::select! {
                _ = tokio::time::sleep(policy.delay) => {}
                _ = &mut shutdown_rx => {
                    info!("WebSocket shutdown requested");
                    return;
                }
            }

            match connect_and_join(&join).await {
                Ok(ws) => {
                    failures = 0;
                    info!("Realtime channel {} reconnected", join.topic);
                    if events.send(ChannelEvent::Reconnected).is_err() {
                        return;
                    }
                    stream = Some(ws);
                }
                Err(e) => {
                    failures += 1;
                    warn!("Reconnect to {} failed: {}", join.topic, e);
                }
            }
        }
    });

    Ok(WsHandle {
        shutdown_tx: Some(shutdown_tx),
    })
}

/// Tells the session this channel is gone for good.
fn give_up(join: &Join, failures: u32, events: &mpsc::UnboundedSender<ChannelEvent>) {
    error!(
        "Giving up on realtime channel {} after {} attempts",
        join.topic, failures
    );
    let _ = events.send(ChannelEvent::Lost(format!(
        "{} unreachable after {} reconnect attempts",
        join.topic, failures
    )));
}

async fn pump(
    ws: WsStream,
    join: &Join,
    heartbeat: Duration,
    events: &mpsc::UnboundedSender<ChannelEvent>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> PumpExit {
    let (mut sink, mut stream) = ws.split();
    let mut presence = PresenceSet::new();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);

    let exit = loop {
        tokio::select! {
            _ = &mut *shutdown_rx => {
                info!("WebSocket shutdown requested");
                break PumpExit::Shutdown;
            }

            _ = ticker.tick() => {
                let beat = match serde_json::to_string(&ClientMessage::Heartbeat) {
                    Ok(beat) => beat,
                    Err(e) => {
                        error!("Failed to encode heartbeat: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::text(beat)).await {
                    warn!("Heartbeat failed on {}: {}", join.topic, e);
                    break PumpExit::Dropped;
                }
            }

            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(text.as_str()) {
                        Ok(message) => {
                            if let Some(event) = translate(message, join.kind, &mut presence) {
                                if events.send(event).is_err() {
                                    debug!("Session for {} is gone", join.topic);
                                    break PumpExit::Shutdown;
                                }
                            }
                        }
                        Err(e) => warn!("Received invalid message: {} ({})", text.as_str(), e),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break PumpExit::Dropped,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    break PumpExit::Dropped;
                }
            }
        }
    };

    if exit == PumpExit::Shutdown {
        let leave = ClientMessage::Leave {
            topic: join.topic.clone(),
        };
        if let Ok(leave) = serde_json::to_string(&leave) {
            sink.send(Message::text(leave)).await.ok();
        }
    }
    sink.close().await.ok();
    exit
}

/// Folds a server message into the channel's view and returns what the session should see.
fn translate(
    message: ServerMessage,
    kind: ChannelKind,
    presence: &mut PresenceSet,
) -> Option<ChannelEvent> {
    match (message, kind) {
        (ServerMessage::Insert { table, .. }, ChannelKind::Inserts) if table == VOTES_TABLE => {
            Some(ChannelEvent::VoteInserted)
        }
        (ServerMessage::PresenceState { keys }, ChannelKind::Presence) => {
            presence.sync(keys);
            Some(ChannelEvent::PresenceSync(presence.keys()))
        }
        (ServerMessage::PresenceDiff { joins, leaves }, ChannelKind::Presence) => {
            presence.apply_diff(joins, &leaves);
            Some(ChannelEvent::PresenceSync(presence.keys()))
        }
        (ServerMessage::Reply { status, message }, _) => {
            if status != "ok" {
                warn!("Realtime join rejected: {} {:?}", status, message);
            }
            None
        }
        (ServerMessage::Error { message }, _) => {
            error!("Realtime error: {}", message);
            None
        }
        _ => None,
    }
}
