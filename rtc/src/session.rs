//! Meeting Session Facade
//!
//! Composes local media, the peer registry, signaling, messaging, speaker
//! detection, and snapshot publication behind the control API consumed by
//! the UI and the signaling-transport glue.
//!
//! All callbacks registered with backend handles capture weak references;
//! a torn-down session is never mutated from a stale completion.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use glossa_common::{
    IceCandidate, ParticipantId, ParticipantProfile, RoomId, SessionDescription,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::backend::{
    DataChannelHandle, MediaConstraints, MediaDevices, MediaHandle, PeerConnector,
};
use crate::config::RtcConfig;
use crate::error::RtcError;
use crate::events::{EventBus, SessionEvent};
use crate::media::LocalMediaController;
use crate::messaging::Messenger;
use crate::registry::{PeerRegistry, PeerSession};
use crate::signaling::SignalingCoordinator;
use crate::snapshot::{ConnectionPhase, SessionSnapshot, SnapshotProjector};
use crate::speaker::SpeakerEstimator;

/// Label of the per-peer application message channel.
const MESSAGE_CHANNEL_LABEL: &str = "messages";

/// One participant's session in one meeting room.
#[derive(Clone)]
pub struct MeetingSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    local_id: ParticipantId,
    room_id: RoomId,
    connector: Arc<dyn PeerConnector>,
    media: Arc<LocalMediaController>,
    registry: Arc<PeerRegistry>,
    signaling: SignalingCoordinator,
    messenger: Messenger,
    speaker: Mutex<SpeakerEstimator>,
    projector: Arc<SnapshotProjector>,
    events: EventBus,
}

impl MeetingSession {
    /// Create a session for `local_id` in `room_id` over the given backend.
    pub fn new(
        local_id: ParticipantId,
        room_id: RoomId,
        config: RtcConfig,
        devices: Arc<dyn MediaDevices>,
        connector: Arc<dyn PeerConnector>,
    ) -> Self {
        let events = EventBus::new(64);
        let media = Arc::new(LocalMediaController::new(devices));
        let registry = Arc::new(PeerRegistry::new());
        let projector = Arc::new(SnapshotProjector::new(
            media.clone(),
            registry.clone(),
            events.clone(),
        ));
        let signaling = SignalingCoordinator::new(
            registry.clone(),
            projector.clone(),
            config.negotiation_timeout,
        );
        let messenger = Messenger::new(registry.clone());
        let speaker = Mutex::new(SpeakerEstimator::new(config.speaker));

        info!(local_id = %local_id, room_id = %room_id, "Meeting session created");

        Self {
            inner: Arc::new(SessionInner {
                local_id,
                room_id,
                connector,
                media,
                registry,
                signaling,
                messenger,
                speaker,
                projector,
                events,
            }),
        }
    }

    /// The local participant.
    #[must_use]
    pub fn local_id(&self) -> ParticipantId {
        self.inner.local_id
    }

    /// The room this session belongs to.
    #[must_use]
    pub fn room_id(&self) -> RoomId {
        self.inner.room_id
    }

    /// Register a new event subscriber.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// The latest published snapshot.
    pub async fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.inner.projector.current().await
    }

    /// Acquire camera/microphone capture.
    ///
    /// Replaces any previously held stream (old tracks are stopped first).
    /// Permission and device failures surface to the caller and land in the
    /// snapshot's `last_error`.
    pub async fn initialize_local_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<(), RtcError> {
        let inner = &self.inner;
        inner.projector.set_phase(ConnectionPhase::Connecting).await;
        inner.projector.publish().await;

        match inner.media.acquire(constraints).await {
            Ok(handle) => {
                self.wire_local_audio_levels(&handle);
                inner.projector.set_phase(ConnectionPhase::Connected).await;
                inner.projector.publish().await;
                Ok(())
            }
            Err(e) => {
                inner.projector.record_error(&e).await;
                inner.projector.set_phase(ConnectionPhase::Idle).await;
                inner.projector.publish().await;
                Err(e)
            }
        }
    }

    /// Flip local audio. Returns the resulting flag; `false` when no audio
    /// track is held. Peers observe the flag without renegotiation.
    pub async fn toggle_audio(&self) -> bool {
        match self.inner.media.toggle_audio().await {
            Some(enabled) => {
                self.inner.projector.publish().await;
                enabled
            }
            None => false,
        }
    }

    /// Flip local video. Returns the resulting flag; `false` when no video
    /// track is held.
    pub async fn toggle_video(&self) -> bool {
        match self.inner.media.toggle_video().await {
            Some(enabled) => {
                self.inner.projector.publish().await;
                enabled
            }
            None => false,
        }
    }

    /// Start screen capture.
    ///
    /// When the platform ends the share (e.g. the browser/OS stop control),
    /// the state transitions to inactive without an explicit
    /// [`stop_screen_share`](Self::stop_screen_share) call.
    pub async fn start_screen_share(&self) -> Result<(), RtcError> {
        let inner = &self.inner;
        let handle = match inner.media.start_screen_share().await {
            Ok(handle) => handle,
            Err(e) => {
                inner.projector.record_error(&e).await;
                inner.projector.publish().await;
                return Err(e);
            }
        };

        if let Some(track) = handle.video_track().cloned() {
            let weak = Arc::downgrade(inner);
            track.on_ended(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    tokio::spawn(async move {
                        if inner.media.stop_screen_share().await {
                            debug!("Screen share ended by the platform");
                            inner.projector.publish().await;
                        }
                    });
                }
            }));
        }

        inner.projector.publish().await;
        Ok(())
    }

    /// Stop screen capture. Idempotent.
    pub async fn stop_screen_share(&self) {
        if self.inner.media.stop_screen_share().await {
            self.inner.projector.publish().await;
        }
    }

    /// Create a session toward `peer_id`, attaching the currently held
    /// camera/mic tracks and opening the `"messages"` data channel.
    ///
    /// Fails with `DuplicatePeer` when a session already exists; use
    /// [`reconnect_peer`](Self::reconnect_peer) to replace one explicitly.
    pub async fn create_peer(
        &self,
        peer_id: ParticipantId,
        profile: Option<ParticipantProfile>,
    ) -> Result<(), RtcError> {
        if self.inner.registry.get(peer_id).await.is_some() {
            return Err(RtcError::DuplicatePeer(peer_id));
        }

        let session = self.build_session(peer_id, profile).await?;
        if let Err(e) = self.inner.registry.insert(session.clone()).await {
            session.close().await;
            return Err(e);
        }

        info!(peer_id = %peer_id, "Peer session created");
        self.inner.projector.publish().await;
        Ok(())
    }

    /// Tear down any existing session for `peer_id` and build a fresh one.
    pub async fn reconnect_peer(&self, peer_id: ParticipantId) -> Result<(), RtcError> {
        if let Some(old) = self.inner.registry.remove(peer_id).await {
            old.close().await;
        }

        let session = self.build_session(peer_id, None).await?;
        if let Err(e) = self.inner.registry.insert(session.clone()).await {
            session.close().await;
            return Err(e);
        }

        info!(peer_id = %peer_id, "Peer session reconnected");
        self.inner.projector.publish().await;
        Ok(())
    }

    /// Tear down one peer. No-op for unknown participants, so cleanup can
    /// race with signaling.
    pub async fn remove_peer(&self, peer_id: ParticipantId) {
        let Some(session) = self.inner.registry.remove(peer_id).await else {
            return;
        };
        session.close().await;

        let change = self.inner.speaker.lock().forget(peer_id, Instant::now());
        if let Some(next) = change {
            self.inner.projector.set_active_speaker(next).await;
        }
        self.inner.projector.publish().await;
    }

    /// Generate a local offer for `peer_id`, for transmission over the
    /// signaling channel. Requires a session in the initial state.
    pub async fn create_offer(
        &self,
        peer_id: ParticipantId,
    ) -> Result<SessionDescription, RtcError> {
        let session = self
            .inner
            .registry
            .get(peer_id)
            .await
            .ok_or(RtcError::PeerNotFound(peer_id))?;

        let offer = self.inner.signaling.create_offer(&session).await?;
        self.inner.projector.publish().await;
        Ok(offer)
    }

    /// Apply a remote offer and return the local answer for transmission.
    ///
    /// Implicitly creates the session on first contact (callee path).
    pub async fn handle_offer(
        &self,
        peer_id: ParticipantId,
        offer: SessionDescription,
    ) -> Result<SessionDescription, RtcError> {
        let session = self.get_or_create(peer_id).await?;
        let answer = self.inner.signaling.apply_remote_offer(&session, offer).await?;
        self.inner.projector.publish().await;
        Ok(answer)
    }

    /// Apply a remote answer.
    ///
    /// Missing peers and out-of-order answers are stale-message conditions:
    /// logged and absorbed, never fatal to the session or other peers.
    pub async fn handle_answer(
        &self,
        peer_id: ParticipantId,
        answer: SessionDescription,
    ) -> Result<(), RtcError> {
        let Some(session) = self.inner.registry.get(peer_id).await else {
            debug!(peer_id = %peer_id, "Answer for unknown peer ignored");
            return Ok(());
        };

        match self.inner.signaling.apply_remote_answer(&session, answer).await {
            Ok(()) => {
                self.inner.projector.publish().await;
            }
            Err(RtcError::InvalidState { actual, .. }) => {
                debug!(peer_id = %peer_id, state = actual, "Stale answer ignored");
            }
            Err(e) => {
                warn!(peer_id = %peer_id, error = %e, "Failed to apply answer");
            }
        }
        Ok(())
    }

    /// Apply or buffer a remote ICE candidate.
    ///
    /// Candidates for unknown peers are dropped silently; a candidate can
    /// legitimately arrive after local teardown.
    pub async fn add_ice_candidate(&self, peer_id: ParticipantId, candidate: IceCandidate) {
        let Some(session) = self.inner.registry.get(peer_id).await else {
            debug!(peer_id = %peer_id, "Candidate for unknown peer dropped");
            return;
        };
        self.inner.signaling.add_ice_candidate(&session, candidate).await;
    }

    /// Attach the active screen-share tracks to `peer_id` and produce a
    /// fresh offer for transmission. Screen tracks are never attached at
    /// creation time; this is their only path to a peer.
    pub async fn renegotiate(
        &self,
        peer_id: ParticipantId,
    ) -> Result<SessionDescription, RtcError> {
        let session = self
            .inner
            .registry
            .get(peer_id)
            .await
            .ok_or(RtcError::PeerNotFound(peer_id))?;

        let tracks = self.inner.media.screen_tracks().await;
        let offer = self.inner.signaling.renegotiate(&session, tracks).await?;
        self.inner.projector.publish().await;
        Ok(offer)
    }

    /// Send an application message to one peer. Returns whether the channel
    /// was open and accepted it.
    pub async fn send_message(&self, peer_id: ParticipantId, payload: Bytes) -> bool {
        self.inner.messenger.send(peer_id, payload).await
    }

    /// Best-effort fan-out to every peer with an open channel.
    pub async fn broadcast_message(&self, payload: Bytes) {
        self.inner.messenger.broadcast(payload).await;
    }

    /// Tear down the whole session: stop local and screen capture, close
    /// every peer, and reset published state. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        info!(room_id = %inner.room_id, "Disconnecting session");

        // Scoped teardown: every step runs regardless of earlier failures.
        inner.media.release().await;

        for session in inner.registry.drain().await {
            session.close().await;
        }

        inner.speaker.lock().reset();
        inner.projector.reset().await;
        inner.projector.publish().await;
    }

    /// Feed local capture levels into the speaker estimator.
    fn wire_local_audio_levels(&self, handle: &MediaHandle) {
        let Some(track) = handle.audio_track() else {
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let local_id = self.inner.local_id;
        track.on_audio_level(Box::new(move |level| {
            let Some(inner) = weak.upgrade() else { return };
            let change = inner.speaker.lock().observe(local_id, level, Instant::now());
            if let Some(next) = change {
                tokio::spawn(async move {
                    inner.projector.set_active_speaker(next).await;
                    inner.projector.publish().await;
                });
            }
        }));
    }

    async fn get_or_create(
        &self,
        peer_id: ParticipantId,
    ) -> Result<Arc<PeerSession>, RtcError> {
        if let Some(session) = self.inner.registry.get(peer_id).await {
            return Ok(session);
        }

        let session = self.build_session(peer_id, None).await?;
        match self.inner.registry.insert(session.clone()).await {
            Ok(()) => Ok(session),
            Err(_) => {
                // Lost a create race; defer to the registered session.
                session.close().await;
                self.inner
                    .registry
                    .get(peer_id)
                    .await
                    .ok_or(RtcError::PeerNotFound(peer_id))
            }
        }
    }

    /// Construct a peer session: connection, current camera/mic tracks, the
    /// message channel, and all event wiring.
    async fn build_session(
        &self,
        peer_id: ParticipantId,
        profile: Option<ParticipantProfile>,
    ) -> Result<Arc<PeerSession>, RtcError> {
        let inner = &self.inner;
        let handle = inner.connector.connect(peer_id).await?;

        for track in inner.media.local_tracks().await {
            if let Err(e) = handle.add_track(track).await {
                handle.close().await;
                return Err(e);
            }
        }

        let channel = match handle.create_data_channel(MESSAGE_CHANNEL_LABEL).await {
            Ok(channel) => channel,
            Err(e) => {
                handle.close().await;
                return Err(e);
            }
        };

        let session = Arc::new(PeerSession::new(peer_id, profile, handle.clone()));
        session.set_channel(channel.clone()).await;

        // Locally produced candidates surface as events; the signaling
        // transport relays them.
        let events = inner.events.clone();
        handle.on_ice_candidate(Box::new(move |candidate| {
            events.publish(SessionEvent::IceCandidateReady { peer_id, candidate });
        }));

        // Remote tracks update the session and the published snapshot.
        let weak_session = Arc::downgrade(&session);
        let weak_inner = Arc::downgrade(inner);
        handle.on_track(Box::new(move |track| {
            let (session, inner) = match (weak_session.upgrade(), weak_inner.upgrade()) {
                (Some(session), Some(inner)) => (session, inner),
                _ => return,
            };
            tokio::spawn(async move {
                // Results for torn-down sessions are dropped.
                if !inner.registry.is_live(&session).await {
                    return;
                }
                session.set_remote_track(track).await;
                inner.projector.publish().await;
            });
        }));

        // A channel announced by the remote side also carries inbound
        // messages.
        let weak_session = Arc::downgrade(&session);
        let weak_inner = Arc::downgrade(inner);
        handle.on_data_channel(Box::new(move |remote_channel| {
            let (session, inner) = match (weak_session.upgrade(), weak_inner.upgrade()) {
                (Some(session), Some(inner)) => (session, inner),
                _ => return,
            };
            Self::wire_inbound_channel(&inner, peer_id, &remote_channel);
            tokio::spawn(async move {
                session.set_remote_channel(remote_channel).await;
            });
        }));

        // The locally opened channel delivers inbound messages too, and its
        // open transition flips the snapshot's channel flag.
        Self::wire_inbound_channel(inner, peer_id, &channel);
        let weak_inner = Arc::downgrade(inner);
        channel.on_open(Box::new(move || {
            if let Some(inner) = weak_inner.upgrade() {
                tokio::spawn(async move {
                    inner.projector.publish().await;
                });
            }
        }));

        // Peer audio levels feed the estimator.
        let weak_inner = Arc::downgrade(inner);
        handle.on_audio_level(Box::new(move |level| {
            let Some(inner) = weak_inner.upgrade() else { return };
            let change = inner.speaker.lock().observe(peer_id, level, Instant::now());
            if let Some(next) = change {
                tokio::spawn(async move {
                    inner.projector.set_active_speaker(next).await;
                    inner.projector.publish().await;
                });
            }
        }));

        Ok(session)
    }

    /// Deliver a channel's inbound messages as events.
    fn wire_inbound_channel(
        inner: &Arc<SessionInner>,
        peer_id: ParticipantId,
        channel: &Arc<dyn DataChannelHandle>,
    ) {
        let events = inner.events.clone();
        channel.on_message(Box::new(move |payload| {
            events.publish(SessionEvent::MessageReceived { peer_id, payload });
        }));
    }
}
