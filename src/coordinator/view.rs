use crate::signaling::messages::Participant;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Opaque handle to a remote participant's media, owned by the engine and
/// read-only to the application.
pub trait RemoteMedia: Send + Sync {
    fn id(&self) -> String;
    fn kind(&self) -> MediaKind;
}

pub type RemoteStream = Arc<dyn RemoteMedia>;

/// Live, read-only view of the room handed to the hosting application.
/// Remote streams are keyed by the owning participant's socket id (one entry
/// per peer, holding that peer's tracks); a key is present exactly while the
/// corresponding peer session is delivering media.
#[derive(Clone, Default)]
pub struct RoomView {
    pub participants: Vec<Participant>,
    pub remote_streams: HashMap<String, Vec<RemoteStream>>,
    pub connection_errors: Vec<String>,
}

impl RoomView {
    pub fn participant(&self, socket_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.socket_id == socket_id)
    }
}

/// Watch-channel publisher for the room view; every mutation is visible to
/// all subscribers in mutation order.
pub struct ViewPublisher {
    tx: watch::Sender<RoomView>,
}

impl ViewPublisher {
    pub fn new(initial: RoomView) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn update<F: FnOnce(&mut RoomView)>(&self, f: F) {
        self.tx.send_modify(f);
    }

    pub fn subscribe(&self) -> watch::Receiver<RoomView> {
        self.tx.subscribe()
    }
}
