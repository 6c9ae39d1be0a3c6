use crate::config::CoordinatorConfig;
use crate::utils::{Error, Result};
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use webrtc::api::media_engine::MediaEngine as RtcMediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::media::LocalTrack;
use super::view::{MediaKind, RemoteMedia, RemoteStream};

/// Coarse connectivity as observed from the media engine. The coordinator
/// only reacts to it; it never drives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous notifications from one media session, tagged with the remote
/// socket id the session belongs to.
#[derive(Clone)]
pub enum EngineEvent {
    LocalCandidate {
        remote: String,
        candidate: String,
    },
    StateChanged {
        remote: String,
        state: EngineConnectionState,
    },
    RemoteTrack {
        remote: String,
        stream: RemoteStream,
    },
}

/// The opaque media capability. One session per remote participant; the
/// engine owns negotiation primitives and connectivity, nothing else.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_session(
        &self,
        remote: &str,
        audio: &LocalTrack,
        video: &LocalTrack,
        events: UnboundedSender<EngineEvent>,
    ) -> Result<Arc<dyn MediaSession>>;
}

#[async_trait]
pub trait MediaSession: Send + Sync {
    async fn create_offer(&self) -> Result<String>;
    /// Applies a remote offer and returns the local answer.
    async fn accept_offer(&self, sdp: &str) -> Result<String>;
    async fn accept_answer(&self, sdp: &str) -> Result<()>;
    async fn add_remote_candidate(&self, candidate: &str) -> Result<()>;
    /// Swaps the outgoing video track in place; no renegotiation.
    async fn replace_video_track(&self, video: &LocalTrack) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// webrtc-rs backed engine: one `RTCPeerConnection` per session, trickle ICE
/// through `on_ice_candidate`, connectivity observed through
/// `on_peer_connection_state_change`.
pub struct RtcEngine {
    api: API,
    rtc_config: RTCConfiguration,
}

impl RtcEngine {
    pub fn new(config: &CoordinatorConfig) -> Result<Self> {
        let mut media_engine = RtcMediaEngine::default();
        media_engine.register_default_codecs()?;
        let api = APIBuilder::new().with_media_engine(media_engine).build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec![format!(
                    "stun:{}:{}",
                    config.stun_server, config.stun_port
                )],
                ..Default::default()
            }],
            ..Default::default()
        };

        Ok(Self { api, rtc_config })
    }
}

struct RtcSession {
    remote: String,
    pc: Arc<RTCPeerConnection>,
    video_sender: Arc<RTCRtpSender>,
}

struct RtcRemoteTrack {
    track: Arc<TrackRemote>,
}

impl RemoteMedia for RtcRemoteTrack {
    fn id(&self) -> String {
        self.track.id()
    }

    fn kind(&self) -> MediaKind {
        match self.track.kind() {
            RTPCodecType::Audio => MediaKind::Audio,
            _ => MediaKind::Video,
        }
    }
}

#[async_trait]
impl MediaEngine for RtcEngine {
    async fn create_session(
        &self,
        remote: &str,
        audio: &LocalTrack,
        video: &LocalTrack,
        events: UnboundedSender<EngineEvent>,
    ) -> Result<Arc<dyn MediaSession>> {
        let pc = Arc::new(self.api.new_peer_connection(self.rtc_config.clone()).await?);

        pc.add_track(audio.track() as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        let video_sender = pc
            .add_track(video.track() as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        let remote_id = remote.to_string();
        let tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let remote_id = remote_id.clone();
            let tx = tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => match serde_json::to_string(&init) {
                        Ok(json) => {
                            let _ = tx.send(EngineEvent::LocalCandidate {
                                remote: remote_id,
                                candidate: json,
                            });
                        }
                        Err(e) => warn!("failed to encode local candidate: {}", e),
                    },
                    Err(e) => warn!("failed to serialize local candidate: {}", e),
                }
            })
        }));

        let remote_id = remote.to_string();
        let tx = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let mapped = match state {
                RTCPeerConnectionState::Connecting => Some(EngineConnectionState::Connecting),
                RTCPeerConnectionState::Connected => Some(EngineConnectionState::Connected),
                RTCPeerConnectionState::Disconnected => Some(EngineConnectionState::Disconnected),
                RTCPeerConnectionState::Failed => Some(EngineConnectionState::Failed),
                RTCPeerConnectionState::Closed => Some(EngineConnectionState::Closed),
                _ => None,
            };
            debug!("peer {}: connection state {}", remote_id, state);
            if let Some(state) = mapped {
                let _ = tx.send(EngineEvent::StateChanged {
                    remote: remote_id.clone(),
                    state,
                });
            }
            Box::pin(async {})
        }));

        let remote_id = remote.to_string();
        let tx = events;
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let _ = tx.send(EngineEvent::RemoteTrack {
                    remote: remote_id.clone(),
                    stream: Arc::new(RtcRemoteTrack { track }),
                });
                Box::pin(async {})
            },
        ));

        Ok(Arc::new(RtcSession {
            remote: remote.to_string(),
            pc,
            video_sender,
        }))
    }
}

#[async_trait]
impl MediaSession for RtcSession {
    async fn create_offer(&self) -> Result<String> {
        let offer = self.pc.create_offer(None).await?;
        let sdp = offer.sdp.clone();
        self.pc.set_local_description(offer).await?;
        Ok(sdp)
    }

    async fn accept_offer(&self, sdp: &str) -> Result<String> {
        let offer = RTCSessionDescription::offer(sdp.to_string())?;
        self.pc.set_remote_description(offer).await?;
        let answer = self.pc.create_answer(None).await?;
        let answer_sdp = answer.sdp.clone();
        self.pc.set_local_description(answer).await?;
        Ok(answer_sdp)
    }

    async fn accept_answer(&self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_string())?;
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &str) -> Result<()> {
        let init: RTCIceCandidateInit = serde_json::from_str(candidate)
            .map_err(|e| Error::Peer(format!("malformed candidate: {}", e)))?;
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn replace_video_track(&self, video: &LocalTrack) -> Result<()> {
        self.video_sender
            .replace_track(Some(video.track() as Arc<dyn TrackLocal + Send + Sync>))
            .await?;
        debug!("peer {}: outgoing video track replaced", self.remote);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}
