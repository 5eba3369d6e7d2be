//! Platform Backend Seam
//!
//! The core drives capture and peer connections through these traits so the
//! same coordination logic runs on the production WebRTC stack and on
//! in-memory doubles under test. Callback registration follows the
//! one-consumer pattern: the core registers each hook exactly once per
//! handle, when it wires a session.

pub mod webrtc;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use glossa_common::{IceCandidate, ParticipantId, SessionDescription};

use crate::error::RtcError;

/// The kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Audio (microphone or screen audio).
    Audio,
    /// Video (camera or screen capture).
    Video,
}

/// Capture constraints for local media acquisition.
#[derive(Debug, Clone, Default)]
pub struct MediaConstraints {
    /// Request an audio track.
    pub audio: bool,
    /// Request a video track.
    pub video: bool,
    /// Preferred input device for audio, when the platform supports selection.
    pub audio_device: Option<String>,
    /// Preferred input device for video.
    pub video_device: Option<String>,
}

impl MediaConstraints {
    /// Request both audio and video with default devices.
    #[must_use]
    pub fn audio_video() -> Self {
        Self {
            audio: true,
            video: true,
            ..Self::default()
        }
    }

    /// Request audio only.
    #[must_use]
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            ..Self::default()
        }
    }
}

/// A live local capture track.
///
/// Disabling a track keeps it attached to peers but transmits silence/black;
/// stopping it releases the device irreversibly.
pub trait MediaTrack: Send + Sync {
    /// Stable identifier within the owning stream.
    fn id(&self) -> String;

    /// Audio or video.
    fn kind(&self) -> TrackKind;

    /// Whether frames are currently flowing.
    fn is_enabled(&self) -> bool;

    /// Flip the enabled flag without detaching or renegotiating.
    fn set_enabled(&self, enabled: bool);

    /// Whether the track has ended (stopped locally or by the platform).
    fn is_ended(&self) -> bool;

    /// Irreversibly stop capture and release the device.
    fn stop(&self);

    /// Register a hook fired once when the track ends, including ends
    /// initiated by the platform (e.g. the OS screen-share indicator).
    fn on_ended(&self, callback: Box<dyn Fn() + Send + Sync>);

    /// Register a hook for RMS audio-level reports. Video tracks never
    /// report.
    fn on_audio_level(&self, callback: Box<dyn Fn(f32) + Send + Sync>);

    /// Downcast support for backends that need their concrete track type.
    fn as_any(&self) -> &dyn Any;
}

/// An owned set of live tracks produced by one capture request.
#[derive(Clone)]
pub struct MediaHandle {
    id: String,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaHandle {
    /// Assemble a handle from tracks.
    #[must_use]
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    /// Stream identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// All tracks in the handle.
    #[must_use]
    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    /// The first audio track, if any.
    #[must_use]
    pub fn audio_track(&self) -> Option<&Arc<dyn MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    /// The first video track, if any.
    #[must_use]
    pub fn video_track(&self) -> Option<&Arc<dyn MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    /// Stop every track in the handle.
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaHandle")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// A remote participant's track as announced by the connection backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    /// Track identifier from the remote side.
    pub id: String,
    /// Audio or video.
    pub kind: TrackKind,
}

/// Acquires local capture streams.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Request camera/microphone capture.
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaHandle, RtcError>;

    /// Request screen/window capture.
    async fn acquire_display(&self) -> Result<MediaHandle, RtcError>;
}

/// Creates peer connections.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Open a new connection handle toward `peer_id`.
    async fn connect(&self, peer_id: ParticipantId) -> Result<Arc<dyn PeerHandle>, RtcError>;
}

/// Handle to one peer connection.
#[async_trait]
pub trait PeerHandle: Send + Sync {
    /// Generate a local offer and store it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription, RtcError>;

    /// Generate a local answer to a previously applied remote offer and
    /// store it as the local description.
    async fn create_answer(&self) -> Result<SessionDescription, RtcError>;

    /// Apply a remote description.
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), RtcError>;

    /// Apply a remote ICE candidate. Callers must only do this after the
    /// remote description is set.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), RtcError>;

    /// Attach a local track for transmission.
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), RtcError>;

    /// Open an ordered, reliable data channel.
    async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannelHandle>, RtcError>;

    /// Close the connection and release its resources.
    async fn close(&self);

    /// Register the hook for locally produced ICE candidates.
    fn on_ice_candidate(&self, callback: Box<dyn Fn(IceCandidate) + Send + Sync>);

    /// Register the hook for remote tracks.
    fn on_track(&self, callback: Box<dyn Fn(RemoteTrack) + Send + Sync>);

    /// Register the hook for data channels opened by the remote side.
    fn on_data_channel(&self, callback: Box<dyn Fn(Arc<dyn DataChannelHandle>) + Send + Sync>);

    /// Register the hook for RMS level reports from the peer's audio.
    fn on_audio_level(&self, callback: Box<dyn Fn(f32) + Send + Sync>);
}

/// Ordered, reliable data channel to one peer.
#[async_trait]
pub trait DataChannelHandle: Send + Sync {
    /// Channel label.
    fn label(&self) -> String;

    /// Whether the channel has reached the open state.
    fn is_open(&self) -> bool;

    /// Queue a payload for delivery. Callers gate on [`Self::is_open`].
    async fn send(&self, payload: Bytes) -> Result<(), RtcError>;

    /// Close the channel.
    async fn close(&self);

    /// Register the hook fired when the channel opens.
    fn on_open(&self, callback: Box<dyn Fn() + Send + Sync>);

    /// Register the hook for inbound messages.
    fn on_message(&self, callback: Box<dyn Fn(Bytes) + Send + Sync>);
}
