use serde::{Deserialize, Serialize};

/// Durable identity and display data supplied by the hosting application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayProfile {
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// One occupant of a room. `socket_id` is the ephemeral connection identifier
/// assigned by the relay; `user_id` is the durable identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub socket_id: String,
    pub user_id: String,
    pub profile: DisplayProfile,
    pub is_muted: bool,
    pub is_video_off: bool,
    pub is_sharing_screen: bool,
}

impl Participant {
    pub fn new(socket_id: String, user_id: String, profile: DisplayProfile) -> Self {
        Self {
            socket_id,
            user_id,
            profile,
            is_muted: false,
            is_video_off: false,
            is_sharing_screen: false,
        }
    }

    /// Merge a state patch, last write wins per field.
    pub fn apply(&mut self, patch: &StatePatch) {
        if let Some(m) = patch.is_muted {
            self.is_muted = m;
        }
        if let Some(v) = patch.is_video_off {
            self.is_video_off = v;
        }
        if let Some(s) = patch.is_sharing_screen {
            self.is_sharing_screen = s;
        }
    }
}

/// Partial update to a participant's broadcast state. Absent fields are
/// untouched on merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_muted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_video_off: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_sharing_screen: Option<bool>,
}

impl StatePatch {
    pub fn muted(is_muted: bool) -> Self {
        Self {
            is_muted: Some(is_muted),
            ..Default::default()
        }
    }

    pub fn video_off(is_video_off: bool) -> Self {
        Self {
            is_video_off: Some(is_video_off),
            ..Default::default()
        }
    }

    pub fn sharing_screen(is_sharing_screen: bool) -> Self {
        Self {
            is_sharing_screen: Some(is_sharing_screen),
            ..Default::default()
        }
    }
}

/// Messages a client sends to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinRoom {
        room_id: String,
        user_id: String,
        profile: DisplayProfile,
    },
    Offer {
        to: String,
        sdp: String,
    },
    Answer {
        to: String,
        sdp: String,
    },
    IceCandidate {
        to: String,
        candidate: String,
    },
    ToggleAudio {
        room_id: String,
        is_muted: bool,
    },
    ToggleVideo {
        room_id: String,
        is_video_off: bool,
    },
    ScreenShareStart {
        room_id: String,
    },
    ScreenShareStop {
        room_id: String,
    },
    LeaveRoom {
        room_id: String,
    },
}

/// Messages the relay sends to a client. Peer-addressed payloads carry the
/// sender's socket id; the sdp/candidate bodies are forwarded verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "kebab-case")]
pub enum ServerMessage {
    RoomState {
        socket_id: String,
        participants: Vec<Participant>,
    },
    ParticipantJoined {
        participant: Participant,
    },
    Offer {
        from: String,
        sdp: String,
    },
    Answer {
        from: String,
        sdp: String,
    },
    IceCandidate {
        from: String,
        candidate: String,
    },
    ParticipantState {
        socket_id: String,
        patch: StatePatch,
    },
    ParticipantLeft {
        socket_id: String,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_round_trip_with_kebab_case_tags() {
        let msg = ClientMessage::JoinRoom {
            room_id: "group-7".to_string(),
            user_id: "u1".to_string(),
            profile: DisplayProfile {
                display_name: "Ada".to_string(),
                avatar_url: None,
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"message_type\":\"join-room\""));
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        match back {
            ClientMessage::JoinRoom { room_id, .. } => assert_eq!(room_id, "group-7"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn patch_merge_is_per_field() {
        let mut p = Participant::new(
            "s1".to_string(),
            "u1".to_string(),
            DisplayProfile {
                display_name: "Ada".to_string(),
                avatar_url: None,
            },
        );
        p.apply(&StatePatch::muted(true));
        p.apply(&StatePatch::video_off(true));
        assert!(p.is_muted);
        assert!(p.is_video_off);
        // A later patch touching one field leaves the others alone.
        p.apply(&StatePatch::muted(false));
        assert!(!p.is_muted);
        assert!(p.is_video_off);
        assert!(!p.is_sharing_screen);
    }
}
