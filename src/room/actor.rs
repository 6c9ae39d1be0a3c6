use crate::signaling::messages::{Participant, ServerMessage, StatePatch};
use log::{debug, info};
use tokio::sync::mpsc::{Receiver, UnboundedSender};
use tokio::sync::oneshot;

use super::state::Room;

/// A forwarded negotiation payload. The relay never inspects the body.
#[derive(Debug, Clone)]
pub enum RelayPayload {
    Offer(String),
    Answer(String),
    Candidate(String),
}

impl RelayPayload {
    fn into_message(self, from: String) -> ServerMessage {
        match self {
            RelayPayload::Offer(sdp) => ServerMessage::Offer { from, sdp },
            RelayPayload::Answer(sdp) => ServerMessage::Answer { from, sdp },
            RelayPayload::Candidate(candidate) => ServerMessage::IceCandidate { from, candidate },
        }
    }
}

/// Membership mutations and forwards for one room. Commands are processed
/// strictly in arrival order by the room's task, which is what linearizes
/// concurrent joins, leaves and broadcasts against each other.
pub enum RoomCommand {
    Join {
        participant: Participant,
        sender: UnboundedSender<ServerMessage>,
        reply: oneshot::Sender<std::result::Result<(), String>>,
    },
    Relay {
        from: String,
        to: String,
        payload: RelayPayload,
    },
    Broadcast {
        from: String,
        patch: StatePatch,
    },
    Leave {
        socket_id: String,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Participant>>,
    },
}

/// Single-writer loop owning one `Room`. Exits once the last participant has
/// left (or every command sender is gone); the caller discards the handle
/// afterwards.
pub async fn run_room(room_id: String, max_participants: usize, mut rx: Receiver<RoomCommand>) {
    let mut room = Room::new(room_id.clone());
    let mut seen_member = false;
    info!("room {}: created", room_id);

    while let Some(command) = rx.recv().await {
        match command {
            RoomCommand::Join {
                participant,
                sender,
                reply,
            } => {
                if room.len() >= max_participants {
                    let _ = reply.send(Err("Room has reached maximum capacity".to_string()));
                    continue;
                }
                if room.contains(&participant.socket_id) {
                    let _ = reply.send(Err("Socket already joined this room".to_string()));
                    continue;
                }

                let socket_id = participant.socket_id.clone();
                let joined = ServerMessage::ParticipantJoined {
                    participant: participant.clone(),
                };
                room.insert(participant, sender);
                seen_member = true;
                info!("room {}: {} joined ({} present)", room_id, socket_id, room.len());

                // Roster first, on the joiner's own queue, so the newcomer
                // knows the room is real before anyone can address it.
                room.send_to(
                    &socket_id,
                    ServerMessage::RoomState {
                        socket_id: socket_id.clone(),
                        participants: room.roster(),
                    },
                );
                room.broadcast_except(&socket_id, &joined);
                let _ = reply.send(Ok(()));
            }
            RoomCommand::Relay { from, to, payload } => {
                if !room.contains(&from) {
                    debug!("room {}: relay from non-member {} dropped", room_id, from);
                    continue;
                }
                room.send_to(&to, payload.into_message(from));
            }
            RoomCommand::Broadcast { from, patch } => {
                if room.apply_patch(&from, &patch) {
                    room.broadcast_except(
                        &from,
                        &ServerMessage::ParticipantState {
                            socket_id: from.clone(),
                            patch,
                        },
                    );
                } else {
                    debug!("room {}: state patch from non-member {} dropped", room_id, from);
                }
            }
            RoomCommand::Leave { socket_id } => {
                // remove() returning false collapses a leave/disconnect race
                // into exactly one departure notification.
                if room.remove(&socket_id) {
                    info!("room {}: {} left ({} remain)", room_id, socket_id, room.len());
                    room.broadcast_except(
                        &socket_id,
                        &ServerMessage::ParticipantLeft {
                            socket_id: socket_id.clone(),
                        },
                    );
                }
                if seen_member && room.is_empty() {
                    break;
                }
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(room.roster());
            }
        }
    }

    info!("room {}: destroyed", room_id);
}
