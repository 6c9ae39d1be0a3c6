use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::sync::Arc;

use super::engine::MediaSession;

/// Negotiation lifecycle for one remote participant, as seen locally.
/// `Connected` is observed from the engine, never driven from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSessionState {
    New,
    OfferSent,
    OfferReceived,
    AnswerSent,
    Connected,
    Closed,
}

#[derive(Debug, Clone)]
pub struct StateTransition {
    pub timestamp: DateTime<Utc>,
    pub from_state: PeerSessionState,
    pub to_state: PeerSessionState,
}

/// One media session with one remote participant. Exclusively owned by the
/// coordinator that created it.
pub struct PeerSession {
    pub remote_socket_id: String,
    pub state: PeerSessionState,
    pub handle: Arc<dyn MediaSession>,
    /// True once a remote description has been applied; candidates arriving
    /// earlier wait in `pending_candidates` instead of being dropped.
    pub remote_description_set: bool,
    pub pending_candidates: Vec<String>,
    pub transitions: Vec<StateTransition>,
}

impl PeerSession {
    pub fn new(remote_socket_id: String, handle: Arc<dyn MediaSession>) -> Self {
        Self {
            remote_socket_id,
            state: PeerSessionState::New,
            handle,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            transitions: Vec::new(),
        }
    }

    fn valid(from: PeerSessionState, to: PeerSessionState) -> bool {
        use PeerSessionState::*;
        match (from, to) {
            (New, OfferSent) => true,
            (New, OfferReceived) => true,
            (OfferReceived, AnswerSent) => true,
            (OfferSent, Connected) | (AnswerSent, Connected) => true,
            // Any non-terminal state can close: remote departure, local
            // leave, or connectivity failure.
            (from, Closed) => from != Closed,
            _ => false,
        }
    }

    /// Applies a transition, recording it. Invalid transitions are rejected
    /// and logged rather than panicking; the caller treats the session as
    /// unchanged.
    pub fn transition(&mut self, to: PeerSessionState) -> bool {
        if !Self::valid(self.state, to) {
            warn!(
                "peer {}: invalid transition {:?} -> {:?}",
                self.remote_socket_id, self.state, to
            );
            return false;
        }
        debug!(
            "peer {}: {:?} -> {:?}",
            self.remote_socket_id, self.state, to
        );
        self.transitions.push(StateTransition {
            timestamp: Utc::now(),
            from_state: self.state,
            to_state: to,
        });
        self.state = to;
        true
    }

    pub fn is_closed(&self) -> bool {
        self.state == PeerSessionState::Closed
    }

    pub fn buffer_candidate(&mut self, candidate: String) {
        self.pending_candidates.push(candidate);
    }

    pub fn drain_candidates(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending_candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Result;
    use async_trait::async_trait;

    struct NullSession;

    #[async_trait]
    impl MediaSession for NullSession {
        async fn create_offer(&self) -> Result<String> {
            Ok("offer".to_string())
        }
        async fn accept_offer(&self, _sdp: &str) -> Result<String> {
            Ok("answer".to_string())
        }
        async fn accept_answer(&self, _sdp: &str) -> Result<()> {
            Ok(())
        }
        async fn add_remote_candidate(&self, _candidate: &str) -> Result<()> {
            Ok(())
        }
        async fn replace_video_track(
            &self,
            _video: &crate::coordinator::media::LocalTrack,
        ) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn session() -> PeerSession {
        PeerSession::new("remote".to_string(), Arc::new(NullSession))
    }

    #[test]
    fn initiator_path() {
        let mut s = session();
        assert!(s.transition(PeerSessionState::OfferSent));
        assert!(s.transition(PeerSessionState::Connected));
        assert!(s.transition(PeerSessionState::Closed));
        assert_eq!(s.transitions.len(), 3);
    }

    #[test]
    fn responder_path() {
        let mut s = session();
        assert!(s.transition(PeerSessionState::OfferReceived));
        assert!(s.transition(PeerSessionState::AnswerSent));
        assert!(s.transition(PeerSessionState::Connected));
    }

    #[test]
    fn rejects_conflicting_negotiation() {
        let mut s = session();
        assert!(s.transition(PeerSessionState::OfferSent));
        // An incoming offer for an initiator session is not a valid turn.
        assert!(!s.transition(PeerSessionState::OfferReceived));
        assert_eq!(s.state, PeerSessionState::OfferSent);
    }

    #[test]
    fn close_is_terminal() {
        let mut s = session();
        assert!(s.transition(PeerSessionState::Closed));
        assert!(!s.transition(PeerSessionState::Closed));
        assert!(!s.transition(PeerSessionState::OfferSent));
    }

    #[test]
    fn candidates_buffer_until_drained() {
        let mut s = session();
        s.buffer_candidate("c1".to_string());
        s.buffer_candidate("c2".to_string());
        assert_eq!(s.drain_candidates(), vec!["c1", "c2"]);
        assert!(s.drain_candidates().is_empty());
    }
}
