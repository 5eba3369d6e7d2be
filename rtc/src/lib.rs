//! Glossa Meeting Core
//!
//! Client-side coordination layer for meeting rooms: local capture
//! lifecycle, peer sessions, offer/answer/ICE sequencing, data-channel
//! messaging, and active-speaker detection.
//!
//! The core does not render UI and does not move signaling bytes. Callers
//! drive it through [`MeetingSession`], receive [`SessionEvent`]s (including
//! SDP/ICE material to relay over their signaling transport), and render
//! from immutable [`SessionSnapshot`]s.

pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod messaging;
pub mod registry;
pub mod session;
pub mod signaling;
pub mod snapshot;
pub mod speaker;

pub use config::{IceServerConfig, RtcConfig, SpeakerConfig};
pub use error::RtcError;
pub use events::SessionEvent;
pub use registry::NegotiationState;
pub use session::MeetingSession;
pub use snapshot::{
    ConnectionPhase, LocalMediaSnapshot, PeerSnapshot, ScreenShareSnapshot, SessionSnapshot,
};
