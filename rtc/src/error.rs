//! Meeting Core Errors

use glossa_common::ParticipantId;
use thiserror::Error;

/// Errors that can occur during media-session operations.
#[derive(Debug, Error)]
pub enum RtcError {
    /// Camera/microphone permission was refused.
    #[error("Access to the camera/microphone was denied")]
    MediaAccessDenied,

    /// No capture device matches the requested constraints.
    #[error("No capture device matches the requested constraints")]
    NoDeviceFound,

    /// Screen capture permission was refused.
    #[error("Screen sharing was denied")]
    ScreenShareDenied,

    /// The platform cannot capture the screen.
    #[error("Screen sharing is not supported on this platform")]
    ScreenShareUnsupported,

    /// No session exists for the participant.
    #[error("Peer not found: {0}")]
    PeerNotFound(ParticipantId),

    /// A session already exists for the participant.
    #[error("Peer session already exists: {0}")]
    DuplicatePeer(ParticipantId),

    /// The offer/answer exchange did not complete within the configured window.
    #[error("Negotiation with {0} timed out")]
    NegotiationTimeout(ParticipantId),

    /// Operation is not valid in the session's current negotiation state.
    #[error("Invalid negotiation state: expected {expected}, got {actual}")]
    InvalidState {
        /// State the operation requires.
        expected: &'static str,
        /// State the session was actually in.
        actual: &'static str,
    },

    /// Signaling payload could not be applied.
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Underlying connection/media backend failure.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<webrtc::Error> for RtcError {
    fn from(err: webrtc::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_errors_name_what_was_denied() {
        assert!(RtcError::MediaAccessDenied
            .to_string()
            .contains("camera/microphone"));
        assert!(RtcError::ScreenShareDenied.to_string().contains("Screen sharing"));
    }

    #[test]
    fn peer_errors_carry_the_participant() {
        let id = ParticipantId::new();
        assert!(RtcError::PeerNotFound(id).to_string().contains(&id.to_string()));
        assert!(RtcError::DuplicatePeer(id).to_string().contains(&id.to_string()));
    }
}
