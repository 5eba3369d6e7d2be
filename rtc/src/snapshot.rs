//! Session State Snapshots
//!
//! The projector recomputes an immutable aggregate of the whole session
//! after every mutating operation and publishes it to subscribers. A
//! snapshot is never mutated in place; each publication allocates a new
//! `Arc`, so consumers can rely on pointer equality for change detection.

use std::collections::HashMap;
use std::sync::Arc;

use glossa_common::{ParticipantId, ParticipantProfile};
use tokio::sync::RwLock;

use crate::events::{EventBus, SessionEvent};
use crate::media::LocalMediaController;
use crate::registry::{NegotiationState, PeerRegistry};

/// Lifecycle phase of the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// No local media held yet, or torn down.
    #[default]
    Idle,
    /// Local media acquisition in flight.
    Connecting,
    /// Local media held; the session is usable.
    Connected,
}

/// Local capture state as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalMediaSnapshot {
    /// Identifier of the held stream, when one exists.
    pub stream_id: Option<String>,
    /// Whether the audio track is enabled.
    pub audio_enabled: bool,
    /// Whether the video track is enabled.
    pub video_enabled: bool,
}

/// Screen-share state as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScreenShareSnapshot {
    /// Identifier of the capture stream, when one exists.
    pub stream_id: Option<String>,
    /// Whether a share is active.
    pub active: bool,
}

/// One peer's state as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSnapshot {
    /// The participant.
    pub id: ParticipantId,
    /// Roster profile, when provided.
    pub profile: Option<ParticipantProfile>,
    /// Negotiation progress.
    pub negotiation: NegotiationState,
    /// Remote audio track id, once one arrived.
    pub remote_audio: Option<String>,
    /// Remote video track id, once one arrived.
    pub remote_video: Option<String>,
    /// Whether the outbound data channel is open.
    pub channel_open: bool,
}

/// Immutable aggregate state published to subscribers.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    /// Local capture state.
    pub local_media: LocalMediaSnapshot,
    /// All peer sessions.
    pub peers: HashMap<ParticipantId, PeerSnapshot>,
    /// Current active speaker, if any.
    pub active_speaker: Option<ParticipantId>,
    /// Screen-share state.
    pub screen_share: ScreenShareSnapshot,
    /// Session lifecycle phase.
    pub phase: ConnectionPhase,
    /// Most recent captured error, for optional UI surfacing.
    pub last_error: Option<String>,
}

/// Recomputes and publishes snapshots.
pub struct SnapshotProjector {
    media: Arc<LocalMediaController>,
    registry: Arc<PeerRegistry>,
    events: EventBus,
    current: RwLock<Arc<SessionSnapshot>>,
    active_speaker: RwLock<Option<ParticipantId>>,
    phase: RwLock<ConnectionPhase>,
    last_error: RwLock<Option<String>>,
}

impl SnapshotProjector {
    /// Create a projector over the session's parts.
    pub fn new(
        media: Arc<LocalMediaController>,
        registry: Arc<PeerRegistry>,
        events: EventBus,
    ) -> Self {
        Self {
            media,
            registry,
            events,
            current: RwLock::new(Arc::new(SessionSnapshot::default())),
            active_speaker: RwLock::new(None),
            phase: RwLock::new(ConnectionPhase::default()),
            last_error: RwLock::new(None),
        }
    }

    /// The latest published snapshot.
    pub async fn current(&self) -> Arc<SessionSnapshot> {
        self.current.read().await.clone()
    }

    /// Update the lifecycle phase. Takes effect at the next publication.
    pub async fn set_phase(&self, phase: ConnectionPhase) {
        *self.phase.write().await = phase;
    }

    /// Update the active speaker. Takes effect at the next publication.
    pub async fn set_active_speaker(&self, speaker: Option<ParticipantId>) {
        *self.active_speaker.write().await = speaker;
    }

    /// Record a captured error for the snapshot's `last_error` field.
    pub async fn record_error(&self, error: &impl ToString) {
        *self.last_error.write().await = Some(error.to_string());
    }

    /// Reset phase, speaker, and error state (teardown).
    pub async fn reset(&self) {
        *self.phase.write().await = ConnectionPhase::Idle;
        *self.active_speaker.write().await = None;
        *self.last_error.write().await = None;
    }

    /// Recompute the snapshot from current state and publish it.
    pub async fn publish(&self) -> Arc<SessionSnapshot> {
        let mut peers = HashMap::new();
        for session in self.registry.all().await {
            peers.insert(
                session.id,
                PeerSnapshot {
                    id: session.id,
                    profile: session.profile.clone(),
                    negotiation: session.negotiation_state().await,
                    remote_audio: session.remote_audio().await.map(|t| t.id),
                    remote_video: session.remote_video().await.map(|t| t.id),
                    channel_open: session.is_channel_open().await,
                },
            );
        }

        let snapshot = Arc::new(SessionSnapshot {
            local_media: self.media.local_snapshot().await,
            peers,
            active_speaker: *self.active_speaker.read().await,
            screen_share: self.media.screen_snapshot().await,
            phase: *self.phase.read().await,
            last_error: self.last_error.read().await.clone(),
        });

        *self.current.write().await = snapshot.clone();
        self.events
            .publish(SessionEvent::StateChanged(snapshot.clone()));
        snapshot
    }
}
