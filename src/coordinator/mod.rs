pub mod channel;
pub mod coordinator;
pub mod engine;
pub mod media;
pub mod session;
pub mod view;

pub use channel::SignalingChannel;
pub use coordinator::{JoinRequest, SessionCoordinator};
pub use engine::{EngineConnectionState, EngineEvent, MediaEngine, MediaSession, RtcEngine};
pub use media::{CameraCapture, LocalMedia, LocalTrack, MediaSource, SampleMediaSource, ScreenCapture};
pub use session::{PeerSession, PeerSessionState};
pub use view::{MediaKind, RemoteMedia, RemoteStream, RoomView};
