use callmesh::config::ServerConfig;
use callmesh::room::RoomRegistry;
use callmesh::signaling::messages::{ClientMessage, DisplayProfile, ServerMessage};
use callmesh::signaling::SignalingServer;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn start_server(config: ServerConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = RoomRegistry::new(config.max_participants, config.max_room_id_len);
    let server = SignalingServer::new(config, registry);
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });
    addr
}

struct Client {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        let (write, read) = ws.split();
        Self { write, read }
    }

    async fn send(&mut self, msg: ClientMessage) {
        let json = serde_json::to_string(&msg).unwrap();
        self.write.send(Message::Text(json)).await.unwrap();
    }

    /// Next protocol message, skipping transport-level frames.
    async fn recv(&mut self) -> ServerMessage {
        tokio::time::timeout(RECV_TIMEOUT, async {
            loop {
                match self.read.next().await.expect("connection closed").unwrap() {
                    Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                    _ => continue,
                }
            }
        })
        .await
        .expect("timed out waiting for server message")
    }

    async fn expect_silence(&mut self, window: Duration) {
        let outcome = tokio::time::timeout(window, async {
            loop {
                match self.read.next().await {
                    Some(Ok(Message::Text(text))) => return text,
                    Some(_) => continue,
                    None => std::future::pending::<()>().await,
                }
            }
        })
        .await;
        if let Ok(text) = outcome {
            panic!("expected no message, got: {}", text);
        }
    }

    /// Joins and returns the assigned socket id.
    async fn join(&mut self, room_id: &str, user_id: &str) -> String {
        self.send(ClientMessage::JoinRoom {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            profile: DisplayProfile {
                display_name: user_id.to_string(),
                avatar_url: None,
            },
        })
        .await;
        match self.recv().await {
            ServerMessage::RoomState { socket_id, .. } => socket_id,
            other => panic!("expected room-state, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn join_returns_roster_then_notifies_existing_members() {
    let addr = start_server(ServerConfig::default()).await;

    let mut a = Client::connect(addr).await;
    a.send(ClientMessage::JoinRoom {
        room_id: "study-1".to_string(),
        user_id: "alice".to_string(),
        profile: DisplayProfile {
            display_name: "Alice".to_string(),
            avatar_url: None,
        },
    })
    .await;
    let a_socket = match a.recv().await {
        ServerMessage::RoomState {
            socket_id,
            participants,
        } => {
            assert_eq!(participants.len(), 1);
            assert_eq!(participants[0].user_id, "alice");
            socket_id
        }
        other => panic!("expected room-state, got {:?}", other),
    };

    let mut b = Client::connect(addr).await;
    let b_socket = b.join("study-1", "bob").await;
    assert_ne!(a_socket, b_socket);

    // The existing member learns about the newcomer, never the reverse.
    match a.recv().await {
        ServerMessage::ParticipantJoined { participant } => {
            assert_eq!(participant.socket_id, b_socket);
            assert_eq!(participant.user_id, "bob");
        }
        other => panic!("expected participant-joined, got {:?}", other),
    }
    b.expect_silence(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn negotiation_messages_are_relayed_verbatim_to_target() {
    let addr = start_server(ServerConfig::default()).await;
    let mut a = Client::connect(addr).await;
    let mut b = Client::connect(addr).await;
    let a_socket = a.join("study-1", "alice").await;
    let b_socket = b.join("study-1", "bob").await;
    let _ = a.recv().await; // participant-joined bob

    a.send(ClientMessage::Offer {
        to: b_socket.clone(),
        sdp: "sdp-offer".to_string(),
    })
    .await;
    match b.recv().await {
        ServerMessage::Offer { from, sdp } => {
            assert_eq!(from, a_socket);
            assert_eq!(sdp, "sdp-offer");
        }
        other => panic!("expected offer, got {:?}", other),
    }

    b.send(ClientMessage::Answer {
        to: a_socket.clone(),
        sdp: "sdp-answer".to_string(),
    })
    .await;
    match a.recv().await {
        ServerMessage::Answer { from, sdp } => {
            assert_eq!(from, b_socket);
            assert_eq!(sdp, "sdp-answer");
        }
        other => panic!("expected answer, got {:?}", other),
    }

    a.send(ClientMessage::IceCandidate {
        to: b_socket.clone(),
        candidate: "candidate:1".to_string(),
    })
    .await;
    match b.recv().await {
        ServerMessage::IceCandidate { from, candidate } => {
            assert_eq!(from, a_socket);
            assert_eq!(candidate, "candidate:1");
        }
        other => panic!("expected ice-candidate, got {:?}", other),
    }
}

#[tokio::test]
async fn state_broadcasts_arrive_in_send_order() {
    let addr = start_server(ServerConfig::default()).await;
    let mut a = Client::connect(addr).await;
    let mut b = Client::connect(addr).await;
    let a_socket = a.join("study-1", "alice").await;
    let _ = b.join("study-1", "bob").await;
    let _ = a.recv().await; // participant-joined bob

    a.send(ClientMessage::ToggleAudio {
        room_id: "study-1".to_string(),
        is_muted: true,
    })
    .await;
    a.send(ClientMessage::ToggleVideo {
        room_id: "study-1".to_string(),
        is_video_off: true,
    })
    .await;
    a.send(ClientMessage::ToggleAudio {
        room_id: "study-1".to_string(),
        is_muted: false,
    })
    .await;

    let mut observed = Vec::new();
    for _ in 0..3 {
        match b.recv().await {
            ServerMessage::ParticipantState { socket_id, patch } => {
                assert_eq!(socket_id, a_socket);
                observed.push(patch);
            }
            other => panic!("expected participant-state, got {:?}", other),
        }
    }
    assert_eq!(observed[0].is_muted, Some(true));
    assert_eq!(observed[1].is_video_off, Some(true));
    assert_eq!(observed[2].is_muted, Some(false));
}

#[tokio::test]
async fn abrupt_disconnect_notifies_remaining_members_only_for_that_peer() {
    let addr = start_server(ServerConfig::default()).await;
    let mut a = Client::connect(addr).await;
    let mut b = Client::connect(addr).await;
    let mut c = Client::connect(addr).await;
    let a_socket = a.join("study-1", "alice").await;
    let b_socket = b.join("study-1", "bob").await;
    let c_socket = c.join("study-1", "carol").await;
    let _ = a.recv().await; // joined bob
    let _ = a.recv().await; // joined carol
    let _ = b.recv().await; // joined carol

    // B vanishes without a leave-room.
    drop(b);

    match a.recv().await {
        ServerMessage::ParticipantLeft { socket_id } => assert_eq!(socket_id, b_socket),
        other => panic!("expected participant-left, got {:?}", other),
    }
    match c.recv().await {
        ServerMessage::ParticipantLeft { socket_id } => assert_eq!(socket_id, b_socket),
        other => panic!("expected participant-left, got {:?}", other),
    }

    // The A<->C pairing is unaffected.
    a.send(ClientMessage::Offer {
        to: c_socket.clone(),
        sdp: "sdp".to_string(),
    })
    .await;
    match c.recv().await {
        ServerMessage::Offer { from, .. } => assert_eq!(from, a_socket),
        other => panic!("expected offer, got {:?}", other),
    }
}

#[tokio::test]
async fn leave_then_disconnect_produces_one_departure() {
    let addr = start_server(ServerConfig::default()).await;
    let mut a = Client::connect(addr).await;
    let mut b = Client::connect(addr).await;
    let _ = a.join("study-1", "alice").await;
    let b_socket = b.join("study-1", "bob").await;
    let _ = a.recv().await; // participant-joined bob

    b.send(ClientMessage::LeaveRoom {
        room_id: "study-1".to_string(),
    })
    .await;
    drop(b);

    match a.recv().await {
        ServerMessage::ParticipantLeft { socket_id } => assert_eq!(socket_id, b_socket),
        other => panic!("expected participant-left, got {:?}", other),
    }
    a.expect_silence(Duration::from_millis(500)).await;
}

#[tokio::test]
async fn relay_to_departed_socket_is_dropped_without_error() {
    let addr = start_server(ServerConfig::default()).await;
    let mut a = Client::connect(addr).await;
    let mut b = Client::connect(addr).await;
    let _ = a.join("study-1", "alice").await;
    let b_socket = b.join("study-1", "bob").await;
    let _ = a.recv().await; // participant-joined bob

    drop(b);
    match a.recv().await {
        ServerMessage::ParticipantLeft { socket_id } => assert_eq!(socket_id, b_socket),
        other => panic!("expected participant-left, got {:?}", other),
    }

    // A stale candidate addressed to the departed socket: logged and
    // dropped, never surfaced back to the sender.
    a.send(ClientMessage::IceCandidate {
        to: b_socket,
        candidate: "candidate:late".to_string(),
    })
    .await;
    a.expect_silence(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn join_is_rejected_when_room_is_full() {
    let config = ServerConfig {
        max_participants: 1,
        ..Default::default()
    };
    let addr = start_server(config).await;
    let mut a = Client::connect(addr).await;
    let _ = a.join("study-1", "alice").await;

    let mut b = Client::connect(addr).await;
    b.send(ClientMessage::JoinRoom {
        room_id: "study-1".to_string(),
        user_id: "bob".to_string(),
        profile: DisplayProfile {
            display_name: "Bob".to_string(),
            avatar_url: None,
        },
    })
    .await;
    match b.recv().await {
        ServerMessage::Error { message } => {
            assert!(message.contains("capacity"), "message: {}", message)
        }
        other => panic!("expected error, got {:?}", other),
    }
    // The rejected client can still join another room on the same socket.
    let _ = b.join("study-2", "bob").await;
}

#[tokio::test]
async fn rooms_are_independent() {
    let addr = start_server(ServerConfig::default()).await;
    let mut a = Client::connect(addr).await;
    let mut b = Client::connect(addr).await;
    let _ = a.join("study-1", "alice").await;
    let _ = b.join("study-2", "bob").await;

    a.send(ClientMessage::ToggleAudio {
        room_id: "study-1".to_string(),
        is_muted: true,
    })
    .await;
    b.expect_silence(Duration::from_millis(300)).await;
}
