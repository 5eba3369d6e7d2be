//! Local Media Management
//!
//! Owns the camera/microphone stream and the screen-capture stream, their
//! enabled flags, and release on teardown. Peers receive references to these
//! tracks; only this controller may stop or replace them.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::backend::{MediaConstraints, MediaDevices, MediaHandle, MediaTrack};
use crate::error::RtcError;
use crate::snapshot::{LocalMediaSnapshot, ScreenShareSnapshot};

#[derive(Default)]
struct LocalMediaState {
    stream: Option<MediaHandle>,
    audio_enabled: bool,
    video_enabled: bool,
}

#[derive(Default)]
struct ScreenShareState {
    stream: Option<MediaHandle>,
    active: bool,
}

/// Controller for locally captured media.
pub struct LocalMediaController {
    devices: Arc<dyn MediaDevices>,
    local: RwLock<LocalMediaState>,
    screen: RwLock<ScreenShareState>,
}

impl LocalMediaController {
    /// Create a controller over the given capture backend.
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            local: RwLock::new(LocalMediaState::default()),
            screen: RwLock::new(ScreenShareState::default()),
        }
    }

    /// Acquire camera/microphone capture, replacing any previously held
    /// stream. The old tracks are stopped before the new request so device
    /// locks are released.
    pub async fn acquire(&self, constraints: &MediaConstraints) -> Result<MediaHandle, RtcError> {
        {
            let mut local = self.local.write().await;
            if let Some(old) = local.stream.take() {
                debug!(stream_id = %old.id(), "Stopping previous local stream");
                old.stop_all();
            }
            local.audio_enabled = false;
            local.video_enabled = false;
        }

        let handle = self.devices.acquire(constraints).await?;

        let mut local = self.local.write().await;
        local.audio_enabled = handle.audio_track().is_some_and(|t| t.is_enabled());
        local.video_enabled = handle.video_track().is_some_and(|t| t.is_enabled());
        local.stream = Some(handle.clone());

        info!(
            stream_id = %handle.id(),
            audio = local.audio_enabled,
            video = local.video_enabled,
            "Local media acquired"
        );

        Ok(handle)
    }

    /// Flip the local audio track's enabled flag in place.
    ///
    /// Returns the resulting flag, or `None` when no audio track is held.
    /// Peers keep the track attached; no renegotiation happens.
    pub async fn toggle_audio(&self) -> Option<bool> {
        let mut local = self.local.write().await;
        let track = local.stream.as_ref().and_then(|s| s.audio_track().cloned())?;

        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        local.audio_enabled = enabled;

        debug!(enabled, "Toggled local audio");
        Some(enabled)
    }

    /// Flip the local video track's enabled flag in place.
    pub async fn toggle_video(&self) -> Option<bool> {
        let mut local = self.local.write().await;
        let track = local.stream.as_ref().and_then(|s| s.video_track().cloned())?;

        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        local.video_enabled = enabled;

        debug!(enabled, "Toggled local video");
        Some(enabled)
    }

    /// Acquire screen capture. Replaces any previous share.
    pub async fn start_screen_share(&self) -> Result<MediaHandle, RtcError> {
        let handle = self.devices.acquire_display().await?;

        let mut screen = self.screen.write().await;
        if let Some(old) = screen.stream.take() {
            old.stop_all();
        }
        screen.stream = Some(handle.clone());
        screen.active = true;

        info!(stream_id = %handle.id(), "Screen share started");
        Ok(handle)
    }

    /// Stop screen capture. Idempotent: clears state even when no share is
    /// active, and reports whether anything changed.
    pub async fn stop_screen_share(&self) -> bool {
        let mut screen = self.screen.write().await;
        let was_active = screen.active;

        if let Some(stream) = screen.stream.take() {
            stream.stop_all();
        }
        screen.active = false;

        if was_active {
            info!("Screen share stopped");
        }
        was_active
    }

    /// Stop every local and screen track and clear state. Called
    /// unconditionally during teardown.
    pub async fn release(&self) {
        {
            let mut local = self.local.write().await;
            if let Some(stream) = local.stream.take() {
                stream.stop_all();
            }
            local.audio_enabled = false;
            local.video_enabled = false;
        }
        self.stop_screen_share().await;
        debug!("Local media released");
    }

    /// Camera/microphone tracks currently held, for attachment at peer
    /// creation. Screen tracks are deliberately excluded; they travel
    /// through renegotiation.
    pub async fn local_tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        let local = self.local.read().await;
        local
            .stream
            .as_ref()
            .map(|s| s.tracks().to_vec())
            .unwrap_or_default()
    }

    /// Screen-share tracks currently held, for renegotiation.
    pub async fn screen_tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        let screen = self.screen.read().await;
        screen
            .stream
            .as_ref()
            .map(|s| s.tracks().to_vec())
            .unwrap_or_default()
    }

    /// Local media state for snapshot assembly.
    pub async fn local_snapshot(&self) -> LocalMediaSnapshot {
        let local = self.local.read().await;
        LocalMediaSnapshot {
            stream_id: local.stream.as_ref().map(|s| s.id().to_string()),
            audio_enabled: local.audio_enabled,
            video_enabled: local.video_enabled,
        }
    }

    /// Screen-share state for snapshot assembly.
    pub async fn screen_snapshot(&self) -> ScreenShareSnapshot {
        let screen = self.screen.read().await;
        ScreenShareSnapshot {
            stream_id: screen.stream.as_ref().map(|s| s.id().to_string()),
            active: screen.active,
        }
    }
}
