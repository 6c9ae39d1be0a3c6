use crate::config::CoordinatorConfig;
use crate::signaling::messages::{ClientMessage, DisplayProfile, ServerMessage, StatePatch};
use crate::utils::{Error, Result};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::channel::SignalingChannel;
use super::engine::{EngineConnectionState, EngineEvent, MediaEngine, MediaSession};
use super::media::{LocalMedia, MediaSource};
use super::session::{PeerSession, PeerSessionState};
use super::view::{RoomView, ViewPublisher};

pub struct JoinRequest {
    pub room_id: String,
    pub user_id: String,
    pub profile: DisplayProfile,
}

enum InternalEvent {
    ScreenEnded,
}

struct Inner {
    sessions: HashMap<String, PeerSession>,
    media: LocalMedia,
    /// Candidates that arrived before any session existed for their peer.
    /// Moved into the session's own buffer once it is created.
    early_candidates: HashMap<String, Vec<String>>,
}

#[derive(Clone)]
struct LoopCtx {
    socket_id: String,
    room_id: String,
    inner: Arc<Mutex<Inner>>,
    engine: Arc<dyn MediaEngine>,
    outgoing: mpsc::Sender<ClientMessage>,
    engine_tx: UnboundedSender<EngineEvent>,
    view: Arc<ViewPublisher>,
}

/// Per-client driver of one media session per remote participant. Scoped to
/// exactly one room; create a fresh coordinator to join another.
pub struct SessionCoordinator {
    ctx: LoopCtx,
    source: Arc<dyn MediaSource>,
    internal_tx: UnboundedSender<InternalEvent>,
    task: JoinHandle<()>,
}

impl SessionCoordinator {
    /// Joins a room. Resolves once local media is acquired and the relay has
    /// acknowledged the join with the current roster; peer sessions converge
    /// afterwards. Entry failures (camera unavailable, channel down, join
    /// rejected) leave no partial state behind.
    pub async fn join(
        config: &CoordinatorConfig,
        engine: Arc<dyn MediaEngine>,
        source: Arc<dyn MediaSource>,
        channel: SignalingChannel,
        request: JoinRequest,
    ) -> Result<Self> {
        // Local media comes first: every session binds local tracks at
        // creation, so nothing may exist before capture does.
        let camera = source.open_camera().await?;
        let media = LocalMedia::from_camera(camera);

        let (outgoing, mut incoming) = channel.into_parts();
        outgoing
            .send(ClientMessage::JoinRoom {
                room_id: request.room_id.clone(),
                user_id: request.user_id,
                profile: request.profile,
            })
            .await
            .map_err(|_| Error::Signaling("Signaling channel is closed".to_string()))?;

        let handshake = async {
            loop {
                match incoming.recv().await {
                    Some(ServerMessage::RoomState {
                        socket_id,
                        participants,
                    }) => return Ok((socket_id, participants)),
                    Some(ServerMessage::Error { message }) => return Err(Error::Room(message)),
                    // Nothing addressed to us can precede our roster.
                    Some(other) => {
                        debug!("ignoring pre-roster message: {:?}", other);
                    }
                    None => {
                        return Err(Error::Signaling(
                            "Signaling channel closed during join".to_string(),
                        ))
                    }
                }
            }
        };
        let (socket_id, participants) = tokio::time::timeout(config.join_timeout, handshake)
            .await
            .map_err(|_| Error::Signaling("Timed out waiting for room state".to_string()))??;
        info!(
            "joined room {} as {} ({} already present)",
            request.room_id,
            socket_id,
            participants.len().saturating_sub(1)
        );

        let view = Arc::new(ViewPublisher::new(RoomView {
            participants,
            ..Default::default()
        }));
        let inner = Arc::new(Mutex::new(Inner {
            sessions: HashMap::new(),
            media,
            early_candidates: HashMap::new(),
        }));
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let ctx = LoopCtx {
            socket_id,
            room_id: request.room_id,
            inner,
            engine,
            outgoing,
            engine_tx,
            view,
        };
        let task = tokio::spawn(run_loop(ctx.clone(), incoming, engine_rx, internal_rx));

        Ok(Self {
            ctx,
            source,
            internal_tx,
            task,
        })
    }

    pub fn socket_id(&self) -> &str {
        &self.ctx.socket_id
    }

    pub fn room_id(&self) -> &str {
        &self.ctx.room_id
    }

    /// Reactive room view for the hosting application.
    pub fn subscribe(&self) -> watch::Receiver<RoomView> {
        self.ctx.view.subscribe()
    }

    pub fn session_count(&self) -> usize {
        self.ctx.inner.lock().sessions.len()
    }

    pub fn session_state(&self, remote_socket_id: &str) -> Option<PeerSessionState> {
        self.ctx
            .inner
            .lock()
            .sessions
            .get(remote_socket_id)
            .map(|s| s.state)
    }

    /// Flips the audio track's enabled flag and broadcasts the change. The
    /// track stays attached to every session; peers only learn about it via
    /// the state broadcast.
    pub async fn toggle_audio(&self, is_muted: bool) -> Result<()> {
        self.ctx.inner.lock().media.audio.set_enabled(!is_muted);
        self.apply_self_patch(StatePatch::muted(is_muted));
        self.ctx
            .outgoing
            .send(ClientMessage::ToggleAudio {
                room_id: self.ctx.room_id.clone(),
                is_muted,
            })
            .await
            .map_err(|_| Error::Signaling("Signaling channel is closed".to_string()))
    }

    pub async fn toggle_video(&self, is_video_off: bool) -> Result<()> {
        self.ctx.inner.lock().media.camera.set_enabled(!is_video_off);
        self.apply_self_patch(StatePatch::video_off(is_video_off));
        self.ctx
            .outgoing
            .send(ClientMessage::ToggleVideo {
                room_id: self.ctx.room_id.clone(),
                is_video_off,
            })
            .await
            .map_err(|_| Error::Signaling("Signaling channel is closed".to_string()))
    }

    /// Switches outgoing video to screen capture by replacing the track on
    /// every existing session in place. No renegotiation happens; sessions
    /// are added by offers, never by content changes.
    pub async fn start_screen_share(&self) -> Result<()> {
        if self.ctx.inner.lock().media.is_sharing_screen() {
            return Ok(());
        }
        let screen = self.source.open_screen().await?;
        let track = screen.video.clone();
        let mut ended = screen.ended.clone();

        let handles = {
            let mut inner = self.ctx.inner.lock();
            inner.media.screen = Some(screen);
            session_handles(&inner)
        };
        for (remote, handle) in handles {
            if let Err(e) = handle.replace_video_track(&track).await {
                warn!("peer {}: failed to switch to screen track: {}", remote, e);
            }
        }

        // Native revocation (the user stopping capture outside the app) must
        // restore the camera without the user noticing the external stop.
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            while ended.changed().await.is_ok() {
                if *ended.borrow() {
                    let _ = internal_tx.send(InternalEvent::ScreenEnded);
                    break;
                }
            }
        });

        self.apply_self_patch(StatePatch::sharing_screen(true));
        self.ctx
            .outgoing
            .send(ClientMessage::ScreenShareStart {
                room_id: self.ctx.room_id.clone(),
            })
            .await
            .map_err(|_| Error::Signaling("Signaling channel is closed".to_string()))
    }

    pub async fn stop_screen_share(&self) -> Result<()> {
        if !stop_screen(&self.ctx).await {
            return Ok(());
        }
        self.apply_self_patch(StatePatch::sharing_screen(false));
        self.ctx
            .outgoing
            .send(ClientMessage::ScreenShareStop {
                room_id: self.ctx.room_id.clone(),
            })
            .await
            .map_err(|_| Error::Signaling("Signaling channel is closed".to_string()))
    }

    /// Leaves the room. All in-flight negotiation is aborted, every session
    /// is closed and local media released before this returns; nothing keeps
    /// running in the background.
    pub async fn leave(self) -> Result<()> {
        let _ = self
            .ctx
            .outgoing
            .send(ClientMessage::LeaveRoom {
                room_id: self.ctx.room_id.clone(),
            })
            .await;
        self.task.abort();

        let handles = {
            let mut inner = self.ctx.inner.lock();
            let handles: Vec<_> = inner
                .sessions
                .drain()
                .map(|(remote, session)| (remote, session.handle))
                .collect();
            inner.early_candidates.clear();
            inner.media.release();
            handles
        };
        for (remote, handle) in handles {
            if let Err(e) = handle.close().await {
                debug!("peer {}: close during leave failed: {}", remote, e);
            }
        }
        self.ctx.view.update(|view| {
            view.remote_streams.clear();
            view.participants.clear();
        });
        info!("left room {}", self.ctx.room_id);
        Ok(())
    }

    fn apply_self_patch(&self, patch: StatePatch) {
        let socket_id = self.ctx.socket_id.clone();
        self.ctx.view.update(move |view| {
            if let Some(me) = view
                .participants
                .iter_mut()
                .find(|p| p.socket_id == socket_id)
            {
                me.apply(&patch);
            }
        });
    }
}

fn session_handles(inner: &Inner) -> Vec<(String, Arc<dyn MediaSession>)> {
    inner
        .sessions
        .iter()
        .map(|(remote, session)| (remote.clone(), session.handle.clone()))
        .collect()
}

async fn run_loop(
    ctx: LoopCtx,
    mut incoming: mpsc::Receiver<ServerMessage>,
    mut engine_rx: UnboundedReceiver<EngineEvent>,
    mut internal_rx: UnboundedReceiver<InternalEvent>,
) {
    loop {
        tokio::select! {
            msg = incoming.recv() => match msg {
                Some(msg) => handle_server_message(&ctx, msg).await,
                None => {
                    debug!("signaling channel closed; coordinator loop ending");
                    break;
                }
            },
            event = engine_rx.recv() => match event {
                Some(event) => handle_engine_event(&ctx, event).await,
                None => break,
            },
            event = internal_rx.recv() => match event {
                Some(InternalEvent::ScreenEnded) => handle_screen_ended(&ctx).await,
                None => break,
            },
        }
    }
}

async fn handle_server_message(ctx: &LoopCtx, message: ServerMessage) {
    match message {
        ServerMessage::ParticipantJoined { participant } => {
            let remote = participant.socket_id.clone();
            ctx.view.update(|view| view.participants.push(participant));
            // We were here first, so we initiate. The newcomer only ever
            // answers; that asymmetry is what prevents duplicate offers.
            initiate_session(ctx, remote).await;
        }
        ServerMessage::Offer { from, sdp } => {
            answer_offer(ctx, from, sdp).await;
        }
        ServerMessage::Answer { from, sdp } => {
            apply_answer(ctx, from, sdp).await;
        }
        ServerMessage::IceCandidate { from, candidate } => {
            apply_candidate(ctx, from, candidate).await;
        }
        ServerMessage::ParticipantState { socket_id, patch } => {
            ctx.view.update(move |view| {
                if let Some(p) = view
                    .participants
                    .iter_mut()
                    .find(|p| p.socket_id == socket_id)
                {
                    p.apply(&patch);
                }
            });
        }
        ServerMessage::ParticipantLeft { socket_id } => {
            close_session(ctx, &socket_id, None).await;
            ctx.view.update(|view| {
                view.participants.retain(|p| p.socket_id != socket_id);
            });
            ctx.inner.lock().early_candidates.remove(&socket_id);
        }
        ServerMessage::Error { message } => {
            warn!("relay error: {}", message);
            ctx.view
                .update(move |view| view.connection_errors.push(message));
        }
        ServerMessage::RoomState { .. } => {
            debug!("unexpected room-state after join; ignored");
        }
    }
}

async fn handle_engine_event(ctx: &LoopCtx, event: EngineEvent) {
    match event {
        // Trickle: each candidate is relayed as soon as it is produced. Sent
        // unconditionally; a stale target is the relay's problem, corrected
        // by departure notifications.
        EngineEvent::LocalCandidate { remote, candidate } => {
            let _ = ctx
                .outgoing
                .send(ClientMessage::IceCandidate {
                    to: remote,
                    candidate,
                })
                .await;
        }
        EngineEvent::StateChanged { remote, state } => match state {
            EngineConnectionState::Connected => {
                if let Some(session) = ctx.inner.lock().sessions.get_mut(&remote) {
                    session.transition(PeerSessionState::Connected);
                }
            }
            EngineConnectionState::Failed | EngineConnectionState::Disconnected => {
                close_session(
                    ctx,
                    &remote,
                    Some(format!("connection to peer {} lost", remote)),
                )
                .await;
            }
            EngineConnectionState::Connecting | EngineConnectionState::Closed => {}
        },
        EngineEvent::RemoteTrack { remote, stream } => {
            let live = ctx
                .inner
                .lock()
                .sessions
                .get(&remote)
                .map(|s| !s.is_closed())
                .unwrap_or(false);
            if live {
                ctx.view.update(move |view| {
                    view.remote_streams.entry(remote).or_default().push(stream);
                });
            }
        }
    }
}

/// Initiator path: create the session, bind local tracks, offer.
async fn initiate_session(ctx: &LoopCtx, remote: String) {
    let (audio, video) = {
        let inner = ctx.inner.lock();
        (inner.media.audio.clone(), inner.media.active_video())
    };
    let handle = match ctx
        .engine
        .create_session(&remote, &audio, &video, ctx.engine_tx.clone())
        .await
    {
        Ok(handle) => handle,
        Err(e) => {
            fail_peer(ctx, &remote, None, format!("session setup failed: {}", e)).await;
            return;
        }
    };

    let sdp = match handle.create_offer().await {
        Ok(sdp) => sdp,
        Err(e) => {
            fail_peer(
                ctx,
                &remote,
                Some(handle),
                format!("offer creation failed: {}", e),
            )
            .await;
            return;
        }
    };

    {
        let mut inner = ctx.inner.lock();
        let mut session = PeerSession::new(remote.clone(), handle);
        session.transition(PeerSessionState::OfferSent);
        // Candidates that raced ahead of this session wait on the session
        // buffer until the answer applies the remote description.
        if let Some(early) = inner.early_candidates.remove(&remote) {
            session.pending_candidates = early;
        }
        inner.sessions.insert(remote.clone(), session);
    }

    let _ = ctx
        .outgoing
        .send(ClientMessage::Offer { to: remote, sdp })
        .await;
}

/// Responder path: we just joined, an existing member is offering.
async fn answer_offer(ctx: &LoopCtx, from: String, sdp: String) {
    if ctx.inner.lock().sessions.contains_key(&from) {
        warn!("peer {}: duplicate offer ignored", from);
        return;
    }

    let (audio, video) = {
        let inner = ctx.inner.lock();
        (inner.media.audio.clone(), inner.media.active_video())
    };
    let handle = match ctx
        .engine
        .create_session(&from, &audio, &video, ctx.engine_tx.clone())
        .await
    {
        Ok(handle) => handle,
        Err(e) => {
            fail_peer(ctx, &from, None, format!("session setup failed: {}", e)).await;
            return;
        }
    };

    let answer = match handle.accept_offer(&sdp).await {
        Ok(answer) => answer,
        Err(e) => {
            fail_peer(ctx, &from, Some(handle), format!("offer rejected: {}", e)).await;
            return;
        }
    };

    let pending = {
        let mut inner = ctx.inner.lock();
        let mut session = PeerSession::new(from.clone(), handle.clone());
        session.transition(PeerSessionState::OfferReceived);
        session.transition(PeerSessionState::AnswerSent);
        session.remote_description_set = true;
        let pending = inner.early_candidates.remove(&from).unwrap_or_default();
        inner.sessions.insert(from.clone(), session);
        pending
    };
    for candidate in pending {
        if let Err(e) = handle.add_remote_candidate(&candidate).await {
            warn!("peer {}: buffered candidate rejected: {}", from, e);
        }
    }

    let _ = ctx
        .outgoing
        .send(ClientMessage::Answer {
            to: from,
            sdp: answer,
        })
        .await;
}

async fn apply_answer(ctx: &LoopCtx, from: String, sdp: String) {
    let handle = {
        let inner = ctx.inner.lock();
        match inner.sessions.get(&from) {
            Some(s) if s.state == PeerSessionState::OfferSent && !s.remote_description_set => {
                s.handle.clone()
            }
            Some(_) => {
                warn!("peer {}: unexpected answer ignored", from);
                return;
            }
            None => {
                debug!("peer {}: answer for unknown session dropped", from);
                return;
            }
        }
    };

    if let Err(e) = handle.accept_answer(&sdp).await {
        fail_peer(ctx, &from, None, format!("answer rejected: {}", e)).await;
        return;
    }

    let pending = {
        let mut inner = ctx.inner.lock();
        match inner.sessions.get_mut(&from) {
            Some(session) => {
                session.remote_description_set = true;
                session.drain_candidates()
            }
            None => return,
        }
    };
    for candidate in pending {
        if let Err(e) = handle.add_remote_candidate(&candidate).await {
            warn!("peer {}: buffered candidate rejected: {}", from, e);
        }
    }
}

async fn apply_candidate(ctx: &LoopCtx, from: String, candidate: String) {
    enum Disposition {
        Apply(Arc<dyn MediaSession>),
        Buffered,
    }
    let disposition = {
        let mut inner = ctx.inner.lock();
        match inner.sessions.get_mut(&from) {
            Some(session) if session.is_closed() => return,
            Some(session) if session.remote_description_set => {
                Disposition::Apply(session.handle.clone())
            }
            Some(session) => {
                session.buffer_candidate(candidate.clone());
                Disposition::Buffered
            }
            None => {
                // Raced ahead of the offer; parked until the session exists.
                inner
                    .early_candidates
                    .entry(from.clone())
                    .or_default()
                    .push(candidate.clone());
                Disposition::Buffered
            }
        }
    };
    if let Disposition::Apply(handle) = disposition {
        // A late or malformed candidate is not fatal to the session.
        if let Err(e) = handle.add_remote_candidate(&candidate).await {
            warn!("peer {}: candidate rejected: {}", from, e);
        }
    }
}

async fn handle_screen_ended(ctx: &LoopCtx) {
    if !stop_screen(ctx).await {
        return;
    }
    info!("screen capture ended externally; camera restored");
    let socket_id = ctx.socket_id.clone();
    ctx.view.update(move |view| {
        if let Some(me) = view
            .participants
            .iter_mut()
            .find(|p| p.socket_id == socket_id)
        {
            me.apply(&StatePatch::sharing_screen(false));
        }
    });
    let _ = ctx
        .outgoing
        .send(ClientMessage::ScreenShareStop {
            room_id: ctx.room_id.clone(),
        })
        .await;
}

/// Drops the screen capture and puts the camera track back on every session.
/// Returns false when no share was active (e.g. a stale ended signal after an
/// explicit stop).
async fn stop_screen(ctx: &LoopCtx) -> bool {
    let (camera, handles) = {
        let mut inner = ctx.inner.lock();
        if inner.media.screen.take().is_none() {
            return false;
        }
        (inner.media.camera.clone(), session_handles(&inner))
    };
    for (remote, handle) in handles {
        if let Err(e) = handle.replace_video_track(&camera).await {
            warn!("peer {}: failed to restore camera track: {}", remote, e);
        }
    }
    true
}

/// Closes one peer session and removes its streams. Contained: no other
/// session or the room membership is touched.
async fn close_session(ctx: &LoopCtx, remote: &str, error: Option<String>) {
    let handle = {
        let mut inner = ctx.inner.lock();
        match inner.sessions.remove(remote) {
            Some(mut session) => {
                session.transition(PeerSessionState::Closed);
                Some(session.handle)
            }
            None => None,
        }
    };
    let Some(handle) = handle else { return };
    if let Err(e) = handle.close().await {
        debug!("peer {}: close failed: {}", remote, e);
    }

    let remote = remote.to_string();
    ctx.view.update(move |view| {
        view.remote_streams.remove(&remote);
        if let Some(error) = error {
            view.connection_errors.push(error);
        }
    });
}

/// Per-peer failure containment: whatever went wrong with this pairing, the
/// rest of the room keeps going.
async fn fail_peer(
    ctx: &LoopCtx,
    remote: &str,
    handle: Option<Arc<dyn MediaSession>>,
    reason: String,
) {
    warn!("peer {}: {}", remote, reason);
    if let Some(handle) = handle {
        let _ = handle.close().await;
    }
    close_session(ctx, remote, None).await;
    ctx.view
        .update(move |view| view.connection_errors.push(reason));
}
