use crate::config::ServerConfig;
use crate::metrics::MetricsRegistry;
use crate::room::{RelayPayload, RoomHandle, RoomRegistry};
use crate::signaling::messages::{ClientMessage, Participant, ServerMessage, StatePatch};
use crate::utils::Result;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use uuid::Uuid;

pub struct SignalingServer {
    config: ServerConfig,
    registry: RoomRegistry,
    metrics: MetricsRegistry,
}

impl SignalingServer {
    pub fn new(config: ServerConfig, registry: RoomRegistry) -> Self {
        Self {
            config,
            registry,
            metrics: MetricsRegistry::new(),
        }
    }

    pub fn metrics(&self) -> MetricsRegistry {
        self.metrics.clone()
    }

    pub async fn start(&self) -> Result<()> {
        let address = format!("0.0.0.0:{}", self.config.ws_port);
        let listener = TcpListener::bind(&address).await?;
        info!("Signaling server listening on {}", address);
        self.serve(listener).await
    }

    /// Accept loop over an already-bound listener. Split from `start` so
    /// tests can bind an ephemeral port first.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let metrics = self.metrics.clone();
        let sweep_age = self.config.client_timeout * 10;
        tokio::spawn(async move {
            loop {
                metrics.cleanup_stale(sweep_age);
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        });

        while let Ok((stream, addr)) = listener.accept().await {
            debug!("New connection from {}", addr);
            let registry = self.registry.clone();
            let metrics = self.metrics.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, config, registry, metrics).await {
                    warn!("Connection from {} ended with error: {}", addr, e);
                }
            });
        }

        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    config: ServerConfig,
    registry: RoomRegistry,
    metrics: MetricsRegistry,
) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (ws_sender, mut ws_receiver) = ws_stream.split();

    // Every connection gets a fresh uuid. Socket ids are never reused, so a
    // stale candidate can never be misrouted to a later occupant of the id.
    let socket_id = Uuid::new_v4().to_string();
    info!("socket {}: connected from {}", socket_id, addr);

    // One writer task drains the per-socket queue into the sink. Delivery
    // order to this client is exactly enqueue order.
    let (out_tx, out_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let writer = tokio::spawn(write_loop(
        ws_sender,
        out_rx,
        config.heartbeat_interval,
        socket_id.clone(),
    ));

    let mut joined: Option<RoomHandle> = None;
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!("socket {}: transport error: {}", socket_id, e);
                        break;
                    }
                    None => break,
                };
                last_seen = Instant::now();
                metrics.record_message(&socket_id);

                match msg {
                    Message::Text(text) => {
                        let parsed: ClientMessage = match serde_json::from_str(&text) {
                            Ok(parsed) => parsed,
                            Err(e) => {
                                warn!("socket {}: malformed message dropped: {}", socket_id, e);
                                continue;
                            }
                        };
                        handle_client_message(parsed, &socket_id, &registry, &out_tx, &mut joined)
                            .await;
                    }
                    Message::Close(_) => break,
                    // Pongs and pings only refresh the idle deadline.
                    _ => {}
                }
            }
            _ = tokio::time::sleep_until(last_seen + config.client_timeout) => {
                warn!("socket {}: idle for {:?}, closing", socket_id, config.client_timeout);
                break;
            }
        }
    }

    // The transport going away is the authoritative departure signal; an
    // earlier explicit leave-room makes this a no-op inside the room.
    if let Some(handle) = joined.take() {
        handle.leave(socket_id.clone()).await;
    }
    metrics.remove(&socket_id);
    drop(out_tx);
    let _ = writer.await;
    info!("socket {}: disconnected", socket_id);
    Ok(())
}

async fn handle_client_message(
    message: ClientMessage,
    socket_id: &str,
    registry: &RoomRegistry,
    out_tx: &UnboundedSender<ServerMessage>,
    joined: &mut Option<RoomHandle>,
) {
    match message {
        ClientMessage::JoinRoom {
            room_id,
            user_id,
            profile,
        } => {
            if joined.is_some() {
                let _ = out_tx.send(ServerMessage::Error {
                    message: "Already joined a room on this connection".to_string(),
                });
                return;
            }
            let participant = Participant::new(socket_id.to_string(), user_id, profile);
            match registry.join(&room_id, participant, out_tx.clone()).await {
                Ok(handle) => *joined = Some(handle),
                Err(message) => {
                    let _ = out_tx.send(ServerMessage::Error { message });
                }
            }
        }
        ClientMessage::Offer { to, sdp } => {
            relay(joined, socket_id, to, RelayPayload::Offer(sdp)).await;
        }
        ClientMessage::Answer { to, sdp } => {
            relay(joined, socket_id, to, RelayPayload::Answer(sdp)).await;
        }
        ClientMessage::IceCandidate { to, candidate } => {
            relay(joined, socket_id, to, RelayPayload::Candidate(candidate)).await;
        }
        ClientMessage::ToggleAudio { is_muted, .. } => {
            broadcast(joined, socket_id, StatePatch::muted(is_muted)).await;
        }
        ClientMessage::ToggleVideo { is_video_off, .. } => {
            broadcast(joined, socket_id, StatePatch::video_off(is_video_off)).await;
        }
        ClientMessage::ScreenShareStart { .. } => {
            broadcast(joined, socket_id, StatePatch::sharing_screen(true)).await;
        }
        ClientMessage::ScreenShareStop { .. } => {
            broadcast(joined, socket_id, StatePatch::sharing_screen(false)).await;
        }
        ClientMessage::LeaveRoom { .. } => {
            if let Some(handle) = joined.take() {
                handle.leave(socket_id.to_string()).await;
            }
        }
    }
}

async fn relay(joined: &Option<RoomHandle>, socket_id: &str, to: String, payload: RelayPayload) {
    match joined {
        Some(handle) => handle.relay(socket_id.to_string(), to, payload).await,
        None => debug!("socket {}: relay before join dropped", socket_id),
    }
}

async fn broadcast(joined: &Option<RoomHandle>, socket_id: &str, patch: StatePatch) {
    match joined {
        Some(handle) => handle.broadcast(socket_id.to_string(), patch).await,
        None => debug!("socket {}: state broadcast before join dropped", socket_id),
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut out_rx: UnboundedReceiver<ServerMessage>,
    heartbeat_interval: Duration,
    socket_id: String,
) {
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            queued = out_rx.recv() => {
                let message = match queued {
                    Some(message) => message,
                    None => break,
                };
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("socket {}: failed to encode message: {}", socket_id, e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    debug!("socket {}: write failed: {}", socket_id, e);
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sink.send(Message::Close(None)).await;
}
