use crate::signaling::messages::{ClientMessage, ServerMessage};
use crate::utils::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const CHANNEL_DEPTH: usize = 100;

/// Bidirectional signaling channel between a coordinator and the relay.
/// The WebSocket constructor spawns one pump per direction; `from_parts`
/// lets an in-process transport (or a test harness) stand in for the socket.
pub struct SignalingChannel {
    outgoing: mpsc::Sender<ClientMessage>,
    incoming: mpsc::Receiver<ServerMessage>,
}

impl SignalingChannel {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (incoming_tx, incoming_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<ClientMessage>(CHANNEL_DEPTH);

        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("failed to encode signaling message: {}", e);
                        continue;
                    }
                };
                if write.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!("signaling read error: {}", e);
                        break;
                    }
                };
                if let Message::Text(text) = msg {
                    match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(parsed) => {
                            if incoming_tx.send(parsed).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("unparseable server message dropped: {}", e),
                    }
                }
            }
        });

        Ok(Self {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        })
    }

    pub fn from_parts(
        outgoing: mpsc::Sender<ClientMessage>,
        incoming: mpsc::Receiver<ServerMessage>,
    ) -> Self {
        Self { outgoing, incoming }
    }

    pub async fn send(&self, msg: ClientMessage) -> Result<()> {
        self.outgoing
            .send(msg)
            .await
            .map_err(|_| Error::Signaling("Signaling channel is closed".to_string()))
    }

    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.incoming.recv().await
    }

    pub fn into_parts(self) -> (mpsc::Sender<ClientMessage>, mpsc::Receiver<ServerMessage>) {
        (self.outgoing, self.incoming)
    }
}
