//! Session Events
//!
//! Outbound events published by the core: state snapshots for the UI, and
//! signaling material for the external transport to relay.

use std::sync::Arc;

use bytes::Bytes;
use glossa_common::{IceCandidate, ParticipantId};
use tokio::sync::broadcast;

use crate::snapshot::SessionSnapshot;

/// Events published to subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A new immutable snapshot replaced the previous one.
    StateChanged(Arc<SessionSnapshot>),

    /// The local ICE agent produced a candidate to relay to `peer_id`.
    ///
    /// The core never transmits candidates itself; it only surfaces them.
    IceCandidateReady {
        /// Peer the candidate belongs to.
        peer_id: ParticipantId,
        /// The candidate to relay.
        candidate: IceCandidate,
    },

    /// A data-channel message arrived from `peer_id`.
    ///
    /// The payload is opaque to the core; interpreting it (e.g. chat JSON)
    /// is the application's concern.
    MessageReceived {
        /// Sending peer.
        peer_id: ParticipantId,
        /// Raw message bytes.
        payload: Bytes,
    },
}

/// Fan-out of [`SessionEvent`]s to any number of subscribers.
///
/// Subscribers that fall behind lose old events rather than block the core.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Create a bus with the given buffered capacity per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Register a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_every_subscriber() {
        let bus = EventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let peer_id = ParticipantId::new();
        bus.publish(SessionEvent::MessageReceived {
            peer_id,
            payload: Bytes::from_static(b"hola"),
        });

        for rx in [&mut first, &mut second] {
            match rx.recv().await.unwrap() {
                SessionEvent::MessageReceived { peer_id: from, payload } => {
                    assert_eq!(from, peer_id);
                    assert_eq!(payload.as_ref(), b"hola");
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new(8);
        bus.publish(SessionEvent::IceCandidateReady {
            peer_id: ParticipantId::new(),
            candidate: IceCandidate::new("candidate:1"),
        });
    }
}
