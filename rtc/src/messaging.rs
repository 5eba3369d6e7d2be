//! Data-Channel Messaging
//!
//! Application messages over each peer's ordered reliable channel. Payloads
//! are opaque bytes; interpreting them (chat JSON, system events) belongs to
//! the application layer.

use std::sync::Arc;

use bytes::Bytes;
use glossa_common::ParticipantId;
use tracing::{debug, warn};

use crate::backend::DataChannelHandle;
use crate::registry::PeerRegistry;

/// Sends and fans out application messages.
pub struct Messenger {
    registry: Arc<PeerRegistry>,
}

impl Messenger {
    /// Create a messenger over the registry.
    pub fn new(registry: Arc<PeerRegistry>) -> Self {
        Self { registry }
    }

    /// Send to one peer.
    ///
    /// Returns `false` when the peer is unknown or its channel is not open;
    /// a connecting or closed channel is an expected transient condition,
    /// never an error.
    pub async fn send(&self, peer_id: ParticipantId, payload: Bytes) -> bool {
        let Some(session) = self.registry.get(peer_id).await else {
            debug!(peer_id = %peer_id, "Dropping message for unknown peer");
            return false;
        };

        let Some(channel) = session.channel().await else {
            return false;
        };
        if !channel.is_open() {
            return false;
        }

        match channel.send(payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!(peer_id = %peer_id, error = %e, "Failed to send data-channel message");
                false
            }
        }
    }

    /// Best-effort fan-out to every peer with an open channel.
    ///
    /// Partial delivery is not a failure of the call; unreachable peers are
    /// skipped and the caller cannot act differently either way.
    pub async fn broadcast(&self, payload: Bytes) {
        // Collect channel handles first so sends happen without holding the
        // registry lock.
        let mut targets: Vec<(ParticipantId, Arc<dyn DataChannelHandle>)> = Vec::new();
        for session in self.registry.all().await {
            if let Some(channel) = session.channel().await {
                if channel.is_open() {
                    targets.push((session.id, channel));
                }
            }
        }

        for (peer_id, channel) in targets {
            if let Err(e) = channel.send(payload.clone()).await {
                warn!(peer_id = %peer_id, error = %e, "Failed to broadcast to peer");
            }
        }
    }
}
