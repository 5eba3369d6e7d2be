//! Glossa Common Library
//!
//! Shared types and the signaling protocol used by the meeting core and by
//! any transport or server component that relays signaling between rooms.

pub mod protocol;
pub mod types;

pub use protocol::{IceCandidate, SdpKind, SessionDescription, SignalMessage, SignalPayload};
pub use types::*;
