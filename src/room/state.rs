use crate::signaling::messages::{Participant, ServerMessage, StatePatch};
use log::{debug, warn};
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

/// One roster entry: the authoritative participant record plus the outbound
/// queue of the socket it belongs to. The queue is drained by a single writer
/// task per connection, so everything pushed here reaches the client in push
/// order.
pub struct Member {
    pub participant: Participant,
    pub sender: UnboundedSender<ServerMessage>,
}

/// A call instance. Owned exclusively by its room actor; every mutation goes
/// through the actor's command queue.
pub struct Room {
    pub id: String,
    members: HashMap<String, Member>,
}

impl Room {
    pub fn new(id: String) -> Self {
        Self {
            id,
            members: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, socket_id: &str) -> bool {
        self.members.contains_key(socket_id)
    }

    pub fn roster(&self) -> Vec<Participant> {
        self.members.values().map(|m| m.participant.clone()).collect()
    }

    pub fn insert(&mut self, participant: Participant, sender: UnboundedSender<ServerMessage>) {
        self.members.insert(
            participant.socket_id.clone(),
            Member {
                participant,
                sender,
            },
        );
    }

    /// Removes a member. Returns false when the socket is already gone, which
    /// is how a leave racing a disconnect collapses to a single departure.
    pub fn remove(&mut self, socket_id: &str) -> bool {
        self.members.remove(socket_id).is_some()
    }

    /// Merges a patch into the participant record. Returns false for an
    /// unknown socket.
    pub fn apply_patch(&mut self, socket_id: &str, patch: &StatePatch) -> bool {
        match self.members.get_mut(socket_id) {
            Some(member) => {
                member.participant.apply(patch);
                true
            }
            None => false,
        }
    }

    /// Enqueues a message to one member. A missing target is not an error:
    /// the sender will be corrected by a departure notification.
    pub fn send_to(&self, socket_id: &str, message: ServerMessage) {
        match self.members.get(socket_id) {
            Some(member) => {
                if member.sender.send(message).is_err() {
                    warn!(
                        "room {}: outbound queue closed for socket {}",
                        self.id, socket_id
                    );
                }
            }
            None => {
                debug!(
                    "room {}: dropping message for departed socket {}",
                    self.id, socket_id
                );
            }
        }
    }

    /// Enqueues a message to every member except `except`.
    pub fn broadcast_except(&self, except: &str, message: &ServerMessage) {
        for (socket_id, member) in &self.members {
            if socket_id == except {
                continue;
            }
            if member.sender.send(message.clone()).is_err() {
                warn!(
                    "room {}: outbound queue closed for socket {}",
                    self.id, socket_id
                );
            }
        }
    }
}
