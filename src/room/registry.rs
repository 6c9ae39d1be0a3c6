use crate::signaling::messages::{Participant, ServerMessage, StatePatch};
use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::{oneshot, RwLock};

use super::actor::{run_room, RelayPayload, RoomCommand};

const ROOM_QUEUE_DEPTH: usize = 64;

/// Handle to one live room actor. Cheap to clone; all operations enqueue a
/// command for the actor.
#[derive(Clone)]
pub struct RoomHandle {
    pub room_id: String,
    generation: u64,
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub async fn relay(&self, from: String, to: String, payload: RelayPayload) {
        // A closed channel means the room is gone; the departed-room case is
        // handled the same way as a departed socket.
        let _ = self.tx.send(RoomCommand::Relay { from, to, payload }).await;
    }

    pub async fn broadcast(&self, from: String, patch: StatePatch) {
        let _ = self.tx.send(RoomCommand::Broadcast { from, patch }).await;
    }

    pub async fn leave(&self, socket_id: String) {
        let _ = self.tx.send(RoomCommand::Leave { socket_id }).await;
    }

    pub async fn snapshot(&self) -> Option<Vec<Participant>> {
        let (reply, done) = oneshot::channel();
        self.tx.send(RoomCommand::Snapshot { reply }).await.ok()?;
        done.await.ok()
    }
}

/// The room store handed to the signaling server. Rooms are spawned on first
/// join and their entries retired when the actor exits; a join racing a dying
/// actor retries against a fresh room.
#[derive(Clone)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<String, RoomHandle>>>,
    generations: Arc<AtomicU64>,
    max_participants: usize,
    max_room_id_len: usize,
}

impl RoomRegistry {
    pub fn new(max_participants: usize, max_room_id_len: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
            max_participants,
            max_room_id_len,
        }
    }

    fn validate_room_id(&self, room_id: &str) -> std::result::Result<(), String> {
        if room_id.is_empty() {
            return Err("Room id must not be empty".to_string());
        }
        if room_id.len() > self.max_room_id_len {
            return Err("Room id too long".to_string());
        }
        Ok(())
    }

    /// Adds a participant to a room, spawning the room actor when needed.
    /// On success the roster has already been queued on `sender` and the
    /// other members notified.
    pub async fn join(
        &self,
        room_id: &str,
        participant: Participant,
        sender: UnboundedSender<ServerMessage>,
    ) -> std::result::Result<RoomHandle, String> {
        self.validate_room_id(room_id)?;

        loop {
            let handle = self.get_or_spawn(room_id).await;
            let (reply, done) = oneshot::channel();
            let sent = handle
                .tx
                .send(RoomCommand::Join {
                    participant: participant.clone(),
                    sender: sender.clone(),
                    reply,
                })
                .await;

            if sent.is_err() {
                self.retire(room_id, handle.generation).await;
                continue;
            }
            match done.await {
                Ok(Ok(())) => return Ok(handle),
                Ok(Err(message)) => return Err(message),
                // Actor exited before answering; start over with a new room.
                Err(_) => {
                    self.retire(room_id, handle.generation).await;
                    continue;
                }
            }
        }
    }

    async fn get_or_spawn(&self, room_id: &str) -> RoomHandle {
        let mut rooms = self.rooms.write().await;
        if let Some(handle) = rooms.get(room_id) {
            return handle.clone();
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(ROOM_QUEUE_DEPTH);
        let handle = RoomHandle {
            room_id: room_id.to_string(),
            generation,
            tx,
        };
        rooms.insert(room_id.to_string(), handle.clone());

        let registry = self.clone();
        let id = room_id.to_string();
        let max = self.max_participants;
        tokio::spawn(async move {
            run_room(id.clone(), max, rx).await;
            registry.retire(&id, generation).await;
        });

        handle
    }

    /// Removes a registry entry, but only the generation it was created for,
    /// so a replacement room spawned in the meantime is left alone.
    async fn retire(&self, room_id: &str, generation: u64) {
        let mut rooms = self.rooms.write().await;
        if rooms
            .get(room_id)
            .map(|h| h.generation == generation)
            .unwrap_or(false)
        {
            debug!("registry: retiring room {}", room_id);
            rooms.remove(room_id);
        }
    }

    /// Roster snapshots for every live room, for the debug endpoint.
    pub async fn snapshot_all(&self) -> Vec<(String, Vec<Participant>)> {
        let handles: Vec<RoomHandle> = self.rooms.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(roster) = handle.snapshot().await {
                out.push((handle.room_id.clone(), roster));
            }
        }
        out
    }

    #[cfg(test)]
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
