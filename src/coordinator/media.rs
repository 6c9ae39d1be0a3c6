use crate::utils::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// An outgoing track plus its enabled flag. Muting flips the flag; the track
/// itself stays attached to every peer session, so the remote side never sees
/// a renegotiation. Samples written while disabled are dropped.
#[derive(Clone)]
pub struct LocalTrack {
    track: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
}

impl LocalTrack {
    pub fn new(track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            track,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub async fn write_sample(&self, sample: &Sample) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.track.write_sample(sample).await?;
        Ok(())
    }
}

/// Opaque handle a capture backend attaches to a capture; dropping it frees
/// whatever device resources back the tracks.
pub type CaptureGuard = Box<dyn Any + Send>;

pub struct CameraCapture {
    pub audio: LocalTrack,
    pub video: LocalTrack,
    pub guard: Option<CaptureGuard>,
}

pub struct ScreenCapture {
    pub video: LocalTrack,
    /// Flips to true when the capture ends outside the application (the user
    /// revokes it natively). The coordinator watches this to fall back to the
    /// camera without being asked.
    pub ended: watch::Receiver<bool>,
    pub guard: Option<CaptureGuard>,
}

/// Where local media comes from. Implementations own device access; failure
/// to open the camera is fatal to a join attempt.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn open_camera(&self) -> Result<CameraCapture>;
    async fn open_screen(&self) -> Result<ScreenCapture>;
}

/// Everything the coordinator sends. At most one camera capture and one
/// screen capture are live at a time; both are dropped on leave.
pub struct LocalMedia {
    pub audio: LocalTrack,
    pub camera: LocalTrack,
    pub screen: Option<ScreenCapture>,
    camera_guard: Option<CaptureGuard>,
}

impl LocalMedia {
    pub fn from_camera(capture: CameraCapture) -> Self {
        Self {
            audio: capture.audio,
            camera: capture.video,
            screen: None,
            camera_guard: capture.guard,
        }
    }

    /// The video track peers should currently receive: screen while sharing,
    /// camera otherwise.
    pub fn active_video(&self) -> LocalTrack {
        match &self.screen {
            Some(screen) => screen.video.clone(),
            None => self.camera.clone(),
        }
    }

    pub fn is_sharing_screen(&self) -> bool {
        self.screen.is_some()
    }

    pub fn release(&mut self) {
        self.screen = None;
        self.camera_guard = None;
    }
}

/// Sample-pushing source built on `TrackLocalStaticSample`. The hosting
/// application feeds encoded frames into the tracks; this crate never touches
/// encoding itself.
#[derive(Default)]
pub struct SampleMediaSource {
    screen_ended: Mutex<Option<watch::Sender<bool>>>,
}

impl SampleMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals that the current screen capture ended outside the app, e.g.
    /// the backend reported the user revoked it.
    pub fn end_screen(&self) {
        if let Some(tx) = self.screen_ended.lock().as_ref() {
            let _ = tx.send(true);
        }
    }
}

#[async_trait]
impl MediaSource for SampleMediaSource {
    async fn open_camera(&self) -> Result<CameraCapture> {
        let audio = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            "callmesh".to_owned(),
        ));
        let video = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            "callmesh".to_owned(),
        ));
        Ok(CameraCapture {
            audio: LocalTrack::new(audio),
            video: LocalTrack::new(video),
            guard: None,
        })
    }

    async fn open_screen(&self) -> Result<ScreenCapture> {
        let video = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            "screen".to_owned(),
            "callmesh".to_owned(),
        ));
        let (tx, rx) = watch::channel(false);
        *self.screen_ended.lock() = Some(tx);
        Ok(ScreenCapture {
            video: LocalTrack::new(video),
            ended: rx,
            guard: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_track_drops_samples() {
        let source = SampleMediaSource::new();
        let capture = source.open_camera().await.unwrap();
        capture.audio.set_enabled(false);
        // Writing while disabled is a no-op, not an error.
        let sample = Sample {
            data: vec![0u8; 4].into(),
            ..Default::default()
        };
        capture.audio.write_sample(&sample).await.unwrap();
        assert!(!capture.audio.is_enabled());
        capture.audio.set_enabled(true);
        assert!(capture.audio.is_enabled());
    }

    #[tokio::test]
    async fn active_video_follows_screen_capture() {
        let source = SampleMediaSource::new();
        let mut media = LocalMedia::from_camera(source.open_camera().await.unwrap());
        assert!(!media.is_sharing_screen());

        let screen = source.open_screen().await.unwrap();
        let mut ended = screen.ended.clone();
        media.screen = Some(screen);
        assert!(media.is_sharing_screen());

        source.end_screen();
        ended.changed().await.unwrap();
        assert!(*ended.borrow());

        media.release();
        assert!(!media.is_sharing_screen());
    }
}
