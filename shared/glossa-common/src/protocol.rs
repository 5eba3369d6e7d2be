//! Signaling Protocol
//!
//! Wire types relayed between participants of a room by the external
//! signaling transport. The meeting core produces and consumes these values
//! but never moves them over the network itself.

use serde::{Deserialize, Serialize};

use crate::types::{ParticipantId, RoomId};

/// Which half of the offer/answer exchange a description belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// A local or remote offer.
    Offer,
    /// A local or remote answer.
    Answer,
}

/// A session description produced or consumed during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer.
    pub kind: SdpKind,
    /// The raw SDP body.
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description.
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer description.
    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A trickled ICE candidate.
///
/// Field layout matches the candidate-init dictionary exchanged by WebRTC
/// stacks, so transports can pass it through without re-mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// The candidate attribute line.
    pub candidate: String,
    /// Media stream identification tag, when provided.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// Create a candidate carrying only the attribute line.
    #[must_use]
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

/// Signaling payload relayed between two participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalPayload {
    /// An SDP offer.
    Offer {
        /// The raw SDP body.
        sdp: String,
    },
    /// An SDP answer.
    Answer {
        /// The raw SDP body.
        sdp: String,
    },
    /// A trickled ICE candidate.
    Candidate {
        /// The candidate.
        candidate: IceCandidate,
    },
}

impl SignalPayload {
    /// Wrap a session description in its payload variant.
    #[must_use]
    pub fn from_description(description: &SessionDescription) -> Self {
        match description.kind {
            SdpKind::Offer => Self::Offer {
                sdp: description.sdp.clone(),
            },
            SdpKind::Answer => Self::Answer {
                sdp: description.sdp.clone(),
            },
        }
    }

    /// Extract a session description, if this payload carries one.
    #[must_use]
    pub fn to_description(&self) -> Option<SessionDescription> {
        match self {
            Self::Offer { sdp } => Some(SessionDescription::offer(sdp.clone())),
            Self::Answer { sdp } => Some(SessionDescription::answer(sdp.clone())),
            Self::Candidate { .. } => None,
        }
    }
}

/// Envelope for relaying a payload through the signaling transport.
///
/// Delivery must be reliable and ordered per sender/target pair; the meeting
/// core depends on candidate arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMessage {
    /// Room the participants belong to.
    pub room_id: RoomId,
    /// Originating participant.
    pub sender: ParticipantId,
    /// Receiving participant.
    pub target: ParticipantId,
    /// The signaling payload.
    pub payload: SignalPayload,
}
