//! Peer Session Registry
//!
//! Owns every active peer session, keyed by participant. The raw map is
//! never exposed; callers go through create/remove/get so lifecycle rules
//! hold in one place.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use glossa_common::{IceCandidate, ParticipantId, ParticipantProfile};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::backend::{DataChannelHandle, PeerHandle, RemoteTrack, TrackKind};
use crate::error::RtcError;

/// Negotiation progress of one peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Session created, no descriptions exchanged.
    New,
    /// Local offer stored, waiting for the remote answer.
    HaveLocalOffer,
    /// Remote offer applied, local answer being produced.
    HaveRemoteOffer,
    /// Both descriptions applied.
    Connected,
    /// Negotiation failed or timed out. Terminal.
    Failed,
}

impl NegotiationState {
    /// Lowercase name for logs and errors.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::HaveLocalOffer => "have_local_offer",
            Self::HaveRemoteOffer => "have_remote_offer",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }

    /// Whether the session can make no further progress.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// One remote participant's session.
///
/// The connection handle and data channel are exclusively owned by this
/// session; the local media tracks attached to it are shared references
/// owned by the media controller.
pub struct PeerSession {
    /// Remote participant.
    pub id: ParticipantId,
    /// Roster profile, when the application provided one.
    pub profile: Option<ParticipantProfile>,
    /// The connection handle.
    pub handle: Arc<dyn PeerHandle>,

    negotiation: RwLock<NegotiationState>,
    remote_audio: RwLock<Option<RemoteTrack>>,
    remote_video: RwLock<Option<RemoteTrack>>,
    channel: RwLock<Option<Arc<dyn DataChannelHandle>>>,
    remote_channel: RwLock<Option<Arc<dyn DataChannelHandle>>>,

    /// Candidates held until the remote description is applied, in arrival
    /// order.
    pub(crate) pending_candidates: Mutex<VecDeque<IceCandidate>>,
    /// Set once the remote description is applied and the queue flushed.
    pub(crate) remote_description_set: AtomicBool,
}

impl PeerSession {
    /// Create a session around a fresh connection handle.
    pub fn new(
        id: ParticipantId,
        profile: Option<ParticipantProfile>,
        handle: Arc<dyn PeerHandle>,
    ) -> Self {
        Self {
            id,
            profile,
            handle,
            negotiation: RwLock::new(NegotiationState::New),
            remote_audio: RwLock::new(None),
            remote_video: RwLock::new(None),
            channel: RwLock::new(None),
            remote_channel: RwLock::new(None),
            pending_candidates: Mutex::new(VecDeque::new()),
            remote_description_set: AtomicBool::new(false),
        }
    }

    /// Current negotiation state.
    pub async fn negotiation_state(&self) -> NegotiationState {
        *self.negotiation.read().await
    }

    /// Overwrite the negotiation state.
    pub async fn set_negotiation_state(&self, state: NegotiationState) {
        *self.negotiation.write().await = state;
    }

    /// Transition only when the session is currently in `from`. Returns
    /// whether the transition applied.
    pub async fn transition(&self, from: NegotiationState, to: NegotiationState) -> bool {
        let mut state = self.negotiation.write().await;
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    /// Record an incoming remote track.
    pub async fn set_remote_track(&self, track: RemoteTrack) {
        match track.kind {
            TrackKind::Audio => *self.remote_audio.write().await = Some(track),
            TrackKind::Video => *self.remote_video.write().await = Some(track),
        }
    }

    /// The remote audio track, if one arrived.
    pub async fn remote_audio(&self) -> Option<RemoteTrack> {
        self.remote_audio.read().await.clone()
    }

    /// The remote video track, if one arrived.
    pub async fn remote_video(&self) -> Option<RemoteTrack> {
        self.remote_video.read().await.clone()
    }

    /// Store the locally opened data channel.
    pub async fn set_channel(&self, channel: Arc<dyn DataChannelHandle>) {
        *self.channel.write().await = Some(channel);
    }

    /// The locally opened data channel.
    pub async fn channel(&self) -> Option<Arc<dyn DataChannelHandle>> {
        self.channel.read().await.clone()
    }

    /// Store the channel announced by the remote side.
    pub async fn set_remote_channel(&self, channel: Arc<dyn DataChannelHandle>) {
        *self.remote_channel.write().await = Some(channel);
    }

    /// Whether the outbound channel is open.
    pub async fn is_channel_open(&self) -> bool {
        self.channel.read().await.as_ref().is_some_and(|c| c.is_open())
    }

    /// Close the data channels and the connection.
    pub async fn close(&self) {
        if let Some(channel) = self.channel.write().await.take() {
            channel.close().await;
        }
        if let Some(channel) = self.remote_channel.write().await.take() {
            channel.close().await;
        }
        self.handle.close().await;
        debug!(peer_id = %self.id, "Peer session closed");
    }
}

/// Registry of active peer sessions.
pub struct PeerRegistry {
    sessions: RwLock<HashMap<ParticipantId, Arc<PeerSession>>>,
}

impl PeerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a new session. Fails with `DuplicatePeer` when one already
    /// exists for the participant.
    pub async fn insert(&self, session: Arc<PeerSession>) -> Result<(), RtcError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(RtcError::DuplicatePeer(session.id));
        }
        sessions.insert(session.id, session);
        Ok(())
    }

    /// Remove and return a session. Safe to call for unknown participants;
    /// cleanup paths race with signaling.
    pub async fn remove(&self, peer_id: ParticipantId) -> Option<Arc<PeerSession>> {
        let removed = self.sessions.write().await.remove(&peer_id);
        if removed.is_some() {
            debug!(peer_id = %peer_id, "Peer session removed");
        }
        removed
    }

    /// Look up a session. Absence is a normal transient condition.
    pub async fn get(&self, peer_id: ParticipantId) -> Option<Arc<PeerSession>> {
        self.sessions.read().await.get(&peer_id).cloned()
    }

    /// Whether `session` is still the registered entry for its participant.
    ///
    /// Async continuations check this before applying results so a torn-down
    /// session is never mutated from a stale completion.
    pub async fn is_live(&self, session: &Arc<PeerSession>) -> bool {
        self.sessions
            .read()
            .await
            .get(&session.id)
            .is_some_and(|current| Arc::ptr_eq(current, session))
    }

    /// All registered sessions.
    pub async fn all(&self) -> Vec<Arc<PeerSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Remove and return every session.
    pub async fn drain(&self) -> Vec<Arc<PeerSession>> {
        self.sessions.write().await.drain().map(|(_, s)| s).collect()
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
